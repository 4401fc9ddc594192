use std::path::Path;

use crate::error::Result;
use crate::manifest::{BackupManifest, LoadedManifest};

pub fn run_manifest_show(dir: &Path) -> Result<()> {
    let loaded = BackupManifest::load(dir)?;
    print_manifest(&loaded);
    Ok(())
}

fn print_manifest(loaded: &LoadedManifest) {
    let manifest = &loaded.manifest;
    let meta = &manifest.backup_metadata;
    println!("version: {}", meta.version);
    println!("created: {}", meta.created_date);
    println!("machine: {}", meta.source_machine);
    println!("written by: {}", meta.origin_app_version);
    println!("type: {}", meta.backup_type);
    println!("completion: {:?}", meta.completion);
    println!(
        "files: {}, bytes: {}",
        meta.total_files_written, manifest.total_bytes_written
    );
    println!(
        "checksum: {}",
        if loaded.checksum_valid { "ok" } else { "MISMATCH" }
    );
    for user in &manifest.users {
        println!(
            "{} ({}) from {} [{}]",
            user.username,
            user.sid,
            user.original_profile_root,
            user.permission_strategy.as_str()
        );
        for folder in user.backed_up_folders.iter().filter(|f| f.selected) {
            println!(
                "  {} ({}): {} files, {} bytes",
                folder.relative_path,
                folder.kind.as_str(),
                folder.file_count,
                folder.size_bytes
            );
        }
    }
}
