use std::path::Path;

use crate::{Result, SystemError};

const TOOL_DIRS: &[&str] = &["/usr/sbin", "/sbin", "/usr/bin", "/bin", "/usr/local/sbin", "/usr/local/bin"];

/// Host tools the node agent shells out to.
pub fn required_tools() -> &'static [&'static str] {
    &["lvcreate", "lvextend", "lvremove", "lvs", "vgs", "vgcreate", "vgextend", "pvs", "udevadm", "stdbuf"]
}

/// Verifies the agent can manage block devices on this host.
pub fn host_check() -> Result<()> {
    check_privileges()?;
    check_tools()?;
    check_block_devices()?;
    Ok(())
}

fn check_privileges() -> Result<()> {
    // SAFETY: geteuid has no preconditions
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(SystemError::HostError(format!(
            "node agent must run as root, effective uid is {}",
            euid
        )));
    }
    tracing::info!("Privilege check passed");
    Ok(())
}

fn check_tools() -> Result<()> {
    let missing: Vec<&str> = required_tools()
        .iter()
        .copied()
        .filter(|tool| !TOOL_DIRS.iter().any(|dir| Path::new(dir).join(tool).exists()))
        .collect();

    if !missing.is_empty() {
        return Err(SystemError::HostError(format!("missing host tools: {}", missing.join(", "))));
    }
    tracing::info!("Host tool check passed");
    Ok(())
}

fn check_block_devices() -> Result<()> {
    let sys_block = Path::new("/sys/block");
    if !sys_block.is_dir() {
        return Err(SystemError::HostError(format!("{} is not accessible", sys_block.display())));
    }
    tracing::info!("Block device check passed");
    Ok(())
}
