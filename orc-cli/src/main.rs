//! Thin binary wiring the collection pipeline together. Argument
//! parsing is a stub: the real CLI surface (the `.xml`/`.json` front
//! end configuration schema of §6) is an external collaborator's job;
//! this exists only to prove the library crates compose into a
//! runnable pipeline, the way the teacher's `cli/src/main.rs` only
//! wires `moses-platform`'s `PlatformDeviceManager` behind two
//! subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use orc_core::config::Config;
use orc_core::{DeviceManager, OrcError};

#[derive(Parser)]
#[command(name = "orc-collect")]
#[command(about = "DFIR forensic collection engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List volumes/devices available for collection on this host.
    List,
    /// Print the system inventory document (§4.11) as JSON.
    Inventory,
    /// Run the full collection pipeline against a JSON configuration
    /// matching `orc_core::config::Config`.
    Collect {
        /// Path to a collection configuration document.
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::List => list_devices().await?,
        Commands::Inventory => print_inventory().await?,
        Commands::Collect { config } => collect(&config).await?,
    }
    Ok(())
}

async fn list_devices() -> anyhow::Result<()> {
    let manager = orc_platform::PlatformDeviceManager;
    let devices = manager.enumerate_devices().await?;
    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }
    for device in devices {
        println!("{}  {}  {:?}  {} bytes", device.id, device.name, device.device_type, device.size);
        if !device.mount_points.is_empty() {
            println!("  mounted at: {:?}", device.mount_points);
        }
    }
    Ok(())
}

async fn print_inventory() -> anyhow::Result<()> {
    let manager = orc_platform::PlatformDeviceManager;
    let identity = orc_platform::collect(&manager).await?;
    println!("{}", serde_json::to_string_pretty(&identity)?);
    Ok(())
}

/// Runs the full pipeline end to end: loads and validates the
/// configuration, consolidates the location set, walks each volume
/// through the sample engine, and archives matched samples alongside
/// the system inventory and the CSV index (§4.11, §6, §5).
async fn collect(config_path: &PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(config_path)?;
    let config: Config = serde_json::from_str(&raw)?;
    config.validate().map_err(anyhow::Error::from)?;

    let manager = orc_platform::PlatformDeviceManager;
    let identity = orc_platform::collect(&manager).await?;

    if let Some(dir) = &config.output.directory {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("SystemIdentity.json"), serde_json::to_vec_pretty(&identity)?)?;
    }

    let mut location_set = orc_collect::LocationSet::new(config.shadows.clone(), &config.excludes)
        .map_err(|e: OrcError| anyhow::anyhow!(e))?;
    for location in &config.locations {
        location_set.add(location);
    }

    let devices = manager.enumerate_devices().await.unwrap_or_default();
    let candidates: Vec<orc_core::Volume> = devices
        .iter()
        .filter_map(|d| d.mount_points.first().map(|mp| (d, mp.clone())))
        .filter_map(|(d, mount)| open_volume(d, mount))
        .collect();
    location_set.consolidate(candidates).map_err(|e: OrcError| anyhow::anyhow!(e))?;

    tracing::info!(volumes = location_set.len(), "consolidated location set");

    let archive_dir = config.output.directory.clone().unwrap_or_else(|| PathBuf::from("."));
    let codec: Box<dyn orc_collect::ArchiveCodec> = Box::new(orc_collect::DirectoryArchiveCodec::new(&archive_dir));
    let (agent, handle) = orc_collect::ArchiveAgent::spawn(codec, orc_collect::archive::DEFAULT_CHANNEL_CAPACITY);

    let matcher = orc_collect::NullContentMatcher;
    let mut engine =
        orc_collect::SampleEngine::new(config.rules.clone(), &matcher, Default::default(), config.limits.clone());

    let mut rows: Vec<std::sync::Arc<std::sync::Mutex<orc_collect::IndexRow>>> = Vec::new();
    for volume in location_set.enumerate() {
        if let Err(e) = walk_volume(&volume, &mut engine, &agent, &mut rows).await {
            tracing::warn!(volume = volume.serial, error = %e, "volume traversal failed");
        }
    }

    drop(agent);
    handle.await??;

    if let Some(csv_path) = &config.output.csv_path {
        // Every row's Arc has exactly one other owner (the completion
        // callback captured by the now-finished archive agent), which
        // has already run by the time `handle` resolves above — the
        // unwrap below can't race the callback that fills in hashes.
        let finished: Vec<orc_collect::IndexRow> = rows
            .into_iter()
            .map(|row| std::sync::Arc::try_unwrap(row).expect("archive callback already ran").into_inner().unwrap())
            .collect();
        orc_collect::archive::write_index(csv_path, &finished).map_err(|e: OrcError| anyhow::anyhow!(e))?;
    }

    Ok(())
}

fn open_volume(device: &orc_core::Device, mount: PathBuf) -> Option<orc_core::Volume> {
    let mut reader = orc_fs::VolumeReader::open_mounted(mount.clone(), u64::MAX).ok()?;
    let geometry = reader.load_boot_sector().ok()?;
    Some(orc_core::Volume {
        serial: geometry.serial,
        backend: orc_core::BackendKind::MountedVolume { path: mount.clone() },
        fs_type: geometry.fs_type,
        cluster_size: geometry.cluster_size,
        sector_count: geometry.total_sectors,
        physical_sector_size: geometry.physical_sector_size,
        logical_sector_size: geometry.logical_sector_size,
        mount_points: vec![mount],
        is_valid: true,
        diagnostic: device.filesystem.clone(),
        parent: None,
        shadow_guid: None,
        created_at: None,
    })
}

async fn walk_volume(
    volume: &orc_core::Volume,
    engine: &mut orc_collect::SampleEngine<'_>,
    agent: &orc_collect::ArchiveAgent,
    rows: &mut Vec<std::sync::Arc<std::sync::Mutex<orc_collect::IndexRow>>>,
) -> anyhow::Result<()> {
    use orc_fs::ntfs::{filetime_to_utc, MftWalker, PathResolver, ResurrectMode};

    let mut reader = orc_collect::location::open_reader_for(volume).map_err(|e| anyhow::anyhow!(e))?;
    reader.load_boot_sector().map_err(|e| anyhow::anyhow!(e))?;

    let mut path_reader = orc_collect::location::open_reader_for(volume).map_err(|e| anyhow::anyhow!(e))?;
    path_reader.load_boot_sector().map_err(|e| anyhow::anyhow!(e))?;
    let path_walker = MftWalker::open(&mut path_reader, ResurrectMode::No).map_err(|e| anyhow::anyhow!(e))?;
    let mut resolver = PathResolver::new(path_walker);

    let mut walker = MftWalker::open(&mut reader, ResurrectMode::No).map_err(|e| anyhow::anyhow!(e))?;
    while let Some(record) = walker.next() {
        let Some(file_name) = record.canonical_file_name() else { continue };
        let full_path = resolver.resolve(record.frn).unwrap_or_else(|_| format!("<Orphan>\\{}", file_name.name));

        // Read the data stream once; the prefix closure below and the
        // archive submission both draw from this single read rather
        // than re-opening the stream per concern.
        let data = walker.open_stream(&record, None).unwrap_or_default();

        let candidate = orc_collect::Candidate {
            frn: record.frn,
            parent_frn: file_name.parent_frn,
            full_path: &full_path,
            name: &file_name.name,
            size: file_name.data_size,
            creation_time: Some(filetime_to_utc(file_name.creation_time)),
            last_modified_time: Some(filetime_to_utc(file_name.modification_time)),
            last_access_time: Some(filetime_to_utc(file_name.access_time)),
            mft_change_time: Some(filetime_to_utc(file_name.mft_change_time)),
        };

        let matched = engine.evaluate(&candidate, |n| Ok(data[..n.min(data.len())].to_vec()));

        match matched {
            Ok(Some((rule_id, status))) => {
                let rule = engine.rule(&rule_id).ok();
                let requested_hashes = rule.map(|r| r.hashes.clone()).unwrap_or_default();
                let wants_content = !matches!(
                    rule.map(|r| r.action),
                    Some(orc_core::config::ContentAction::MetadataOnly)
                );

                let row = std::sync::Arc::new(std::sync::Mutex::new(orc_collect::IndexRow {
                    computer_name: String::new(),
                    volume_serial: format!("{:#x}", volume.serial),
                    snapshot_guid: volume.shadow_guid.map(|g| g.to_string()).unwrap_or_default(),
                    parent_frn: format!("{}", file_name.parent_frn),
                    frn: format!("{}", record.frn),
                    full_path: full_path.clone(),
                    size: candidate.size,
                    md5: String::new(),
                    sha1: String::new(),
                    sha256: String::new(),
                    ssdeep: String::new(),
                    tlsh: String::new(),
                    rule_id,
                    creation_time: candidate.creation_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    last_modified_time: candidate.last_modified_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    last_access_time: candidate.last_access_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    mft_change_time: candidate.mft_change_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    archive_name: full_path.trim_start_matches('\\').to_string(),
                    status: status.to_string(),
                }));
                rows.push(row.clone());

                // A quota-exhausted match, or a rule whose content
                // action is metadata-only (§4.8), still produces a row
                // — its content is just never read into the archive.
                if status.is_success() && wants_content {
                    let name_in_archive = row.lock().unwrap().archive_name.clone();
                    let item = orc_collect::ArchiveItem {
                        name_in_archive,
                        stream: Box::new(orc_core::stream::BufferStream::new(data)),
                        requested_hashes,
                        on_complete: Box::new(move |result| {
                            let mut row = row.lock().unwrap();
                            match result {
                                Ok(digests) => {
                                    if let Some(md5) = digests.md5 {
                                        row.md5 = md5;
                                    }
                                    if let Some(sha1) = digests.sha1 {
                                        row.sha1 = sha1;
                                    }
                                    if let Some(sha256) = digests.sha256 {
                                        row.sha256 = sha256;
                                    }
                                }
                                Err(_) => {
                                    row.status = orc_core::Status::FailedIo.to_string();
                                }
                            }
                        }),
                    };
                    let _ = agent.submit(item).await;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(frn = %record.frn, error = %e, "sample evaluation failed"),
        }
    }

    Ok(())
}
