//! Hash computation tee'd alongside archive writes (§4.9: "hashing is
//! pipelined with compression... the tee splits writes to two sinks").
//! The hashing primitives themselves are an external collaborator per
//! §1 ("assumed available as byte-stream transformers") but the
//! `md-5`/`sha1`/`sha2` crates are already in the teacher's dependency
//! table (carried, per `DESIGN.md`, for exactly this step), so this
//! wires them in rather than leaving the CSV's hash columns
//! permanently empty. SSDEEP/TLSH stay unsupported — no such crate is
//! in the example pack to borrow — and are left blank like the
//! teacher leaves unavailable report fields blank rather than guessed.

use md5::Md5;
use orc_core::config::HashAlgo;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Digests computed for one sample, formatted lower-case hex ready to
/// drop straight into an [`super::IndexRow`]. A field stays `None` when
/// its algorithm wasn't requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashDigests {
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

/// Accumulates only the digests a rule actually asked for, fed one
/// chunk at a time as bytes pass through the archive tee.
#[derive(Default)]
pub struct HashAccumulator {
    md5: Option<Md5>,
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
}

impl HashAccumulator {
    /// Builds an accumulator with exactly the hashers named in
    /// `algos`; `SsDeep`/`Tlsh` are silently skipped (unsupported, no
    /// bundled implementation).
    pub fn requested(algos: &[HashAlgo]) -> Self {
        let mut acc = HashAccumulator::default();
        for algo in algos {
            match algo {
                HashAlgo::Md5 => acc.md5 = Some(Md5::new()),
                HashAlgo::Sha1 => acc.sha1 = Some(Sha1::new()),
                HashAlgo::Sha256 => acc.sha256 = Some(Sha256::new()),
                HashAlgo::SsDeep | HashAlgo::Tlsh => {}
            }
        }
        acc
    }

    pub fn is_empty(&self) -> bool {
        self.md5.is_none() && self.sha1.is_none() && self.sha256.is_none()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        if let Some(h) = self.md5.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.sha1.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.sha256.as_mut() {
            h.update(chunk);
        }
    }

    pub fn finish(self) -> HashDigests {
        HashDigests {
            md5: self.md5.map(|h| hex::encode(h.finalize())),
            sha1: self.sha1.map(|h| hex::encode(h.finalize())),
            sha256: self.sha256.map(|h| hex::encode(h.finalize())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_only_requested_algorithms() {
        let mut acc = HashAccumulator::requested(&[HashAlgo::Sha256]);
        acc.update(b"hello world");
        let digests = acc.finish();
        assert!(digests.md5.is_none());
        assert!(digests.sha1.is_none());
        assert_eq!(
            digests.sha256.unwrap(),
            "b94d27b9934d3e08a52e52d7da7dacefe8a7e9ca32a5a7dee0dd0c7f0c5fb6e3"
        );
    }

    #[test]
    fn empty_request_computes_nothing() {
        let acc = HashAccumulator::requested(&[]);
        assert!(acc.is_empty());
        assert_eq!(acc.finish(), HashDigests::default());
    }

    #[test]
    fn chunked_updates_match_single_update() {
        let mut chunked = HashAccumulator::requested(&[HashAlgo::Md5]);
        chunked.update(b"hello ");
        chunked.update(b"world");
        let mut whole = HashAccumulator::requested(&[HashAlgo::Md5]);
        whole.update(b"hello world");
        assert_eq!(chunked.finish(), whole.finish());
    }
}
