use serde::{Deserialize, Serialize};
use std::fmt;

/// Every attempted item produces a CSV row with a `Status` among these
/// (§7). `Resurrected` composes with `Ok` the way the open question in
/// §9 implies: the source emits resurrected records to the index with a
/// suffixed status rather than a parallel column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    Ok,
    OkResurrected,
    SkippedQuota,
    SkippedUnsupported,
    FailedIo,
    FailedMalformed,
    Aborted,
}

impl Status {
    pub fn ok(resurrected: bool) -> Self {
        if resurrected {
            Status::OkResurrected
        } else {
            Status::Ok
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::OkResurrected)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "ok",
            Status::OkResurrected => "ok-resurrected",
            Status::SkippedQuota => "skipped-quota",
            Status::SkippedUnsupported => "skipped-unsupported",
            Status::FailedIo => "failed-io",
            Status::FailedMalformed => "failed-malformed",
            Status::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
