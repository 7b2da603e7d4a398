//! Administrative console
//!
//! Line commands read from stdin:
//! ```text
//! connect
//! status
//! connected <profile>
//! check <profile> <address>
//! priority <profile> <address> <primary|secondary>
//! clear <profile> <primary|secondary>
//! reset
//! ```

use crate::scheduler::AutoConnectHandle;
use anyhow::{anyhow, bail, Result};
use autoconnect_shared::{Device, PriorityTag, Profile};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Connect,
    Status,
    Connected(Profile),
    Check {
        profile: Profile,
        device: Device,
    },
    SetPriority {
        profile: Profile,
        device: Device,
        tag: PriorityTag,
    },
    ClearPriority {
        profile: Profile,
        tag: PriorityTag,
    },
    Reset,
}

fn parse_profile(word: &str) -> Result<Profile> {
    Profile::ALL
        .into_iter()
        .find(|p| p.to_string().eq_ignore_ascii_case(word))
        .ok_or_else(|| anyhow!("Unknown profile {:?}", word))
}

fn parse_tag(word: &str) -> Result<PriorityTag> {
    PriorityTag::ALL
        .into_iter()
        .find(|t| t.to_string().eq_ignore_ascii_case(word))
        .ok_or_else(|| anyhow!("Unknown priority {:?}", word))
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<AdminCommand>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        [] => return Ok(None),
        ["connect"] => AdminCommand::Connect,
        ["status"] => AdminCommand::Status,
        ["reset"] => AdminCommand::Reset,
        ["connected", profile] => AdminCommand::Connected(parse_profile(profile)?),
        ["check", profile, address] => AdminCommand::Check {
            profile: parse_profile(profile)?,
            device: address.parse()?,
        },
        ["priority", profile, address, tag] => AdminCommand::SetPriority {
            profile: parse_profile(profile)?,
            device: address.parse()?,
            tag: parse_tag(tag)?,
        },
        ["clear", profile, tag] => AdminCommand::ClearPriority {
            profile: parse_profile(profile)?,
            tag: parse_tag(tag)?,
        },
        _ => bail!("Unrecognized command {:?}", line.trim()),
    };
    Ok(Some(command))
}

async fn execute(handle: &AutoConnectHandle, command: AdminCommand) -> Result<()> {
    match command {
        AdminCommand::Connect => handle.sink().trigger().await,
        AdminCommand::Status => {
            for status in handle.snapshot().await {
                info!("{}", status.to_string().trim_end());
            }
            match handle.current_attempt().await {
                Some(attempt) => info!("[ADMIN] Connecting {}", attempt),
                None => info!("[ADMIN] No attempt in flight"),
            }
            Ok(())
        }
        AdminCommand::Connected(profile) => {
            let devices = handle.connected_devices(profile).await;
            if devices.is_empty() {
                info!("[ADMIN] Nothing connected on {}", profile);
            }
            for device in devices {
                info!("[ADMIN] {} connected on {}", device, profile);
            }
            Ok(())
        }
        AdminCommand::Check { profile, device } => {
            let connected = handle.is_connected(profile, &device).await;
            info!(
                "[ADMIN] {} is {}connected on {}",
                device,
                if connected { "" } else { "not " },
                profile
            );
            Ok(())
        }
        AdminCommand::SetPriority {
            profile,
            device,
            tag,
        } => handle.set_priority(profile, device, tag).await,
        AdminCommand::ClearPriority { profile, tag } => {
            match handle.clear_priority(profile, tag).await? {
                Some(device) => info!("[ADMIN] {} no longer {} on {}", device, tag, profile),
                None => info!("[ADMIN] No {} device on {}", tag, profile),
            }
            Ok(())
        }
        AdminCommand::Reset => handle.reset_profile_device_lists().await,
    }
}

/// Read and execute commands until `input` ends
pub async fn run_console<R>(handle: &AutoConnectHandle, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                warn!("[ADMIN] {}", e);
                continue;
            }
        };
        if let Err(e) = execute(handle, command).await {
            warn!("[ADMIN] Command failed: {}", e);
        }
    }
    Ok(())
}
