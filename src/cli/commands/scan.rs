use crate::cli::commands::Context;
use crate::error::Result;
use crate::profile::{is_session_active_with, list_accounts_with, UserProfile};

pub fn run_scan(ctx: &Context) -> Result<()> {
    let probe = ctx.probe();
    let profiles = list_accounts_with(&probe)?;
    if profiles.is_empty() {
        println!("no user profiles found under {}", ctx.cfg.users_root.display());
        return Ok(());
    }
    for profile in &profiles {
        let signed_in = is_session_active_with(&probe, &profile.username);
        print_profile(profile, signed_in, ctx.run_mode.verbose);
    }
    Ok(())
}

fn print_profile(profile: &UserProfile, signed_in: bool, verbose: bool) {
    let mut flags = Vec::new();
    if profile.is_current_session {
        flags.push("current user");
    }
    if signed_in {
        flags.push("signed in");
    }
    println!("{}", profile.username);
    println!("  sid: {}", profile.sid);
    println!("  root: {}", profile.profile_root.display());
    println!("  estimated size: {} bytes", profile.estimated_size);
    if !flags.is_empty() {
        println!("  session: {}", flags.join(", "));
    }
    for folder in &profile.folder_selections {
        if !verbose && !folder.selected {
            continue;
        }
        println!(
            "  [{}] {} ({}): {} files, {} bytes",
            if folder.selected { "x" } else { " " },
            folder.display_name,
            folder.kind.as_str(),
            folder.file_count,
            folder.size_bytes
        );
    }
}
