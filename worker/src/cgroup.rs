use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Mount point of the cgroup v2 hierarchy.
const CGROUP_FS: &str = "/sys/fs/cgroup";

/// Mode used when creating files inside a cgroup.
const CGROUP_FILE_MODE: u32 = 0o400;

/// Limits applied to one job's leaf cgroup. The `cpu_max` and `memory_max`
/// strings are written verbatim; `io.max` rows are composed per block device.
pub(crate) struct LeafLimits<'a> {
    pub cpu_max: Option<&'a str>,
    pub memory_max: Option<&'a str>,
    pub riops_max: u32,
    pub wiops_max: u32,
    pub block_devices: &'a [String],
}

/// Creates the root cgroup shared by all jobs of this worker and enables the
/// cpu, memory and io controllers for its children.
pub(crate) fn create_root() -> Result<PathBuf> {
    let path = unique_dir(Path::new(CGROUP_FS), "job-worker-")?;
    write_file(&path.join("cgroup.subtree_control"), "+cpu +memory +io")?;
    Ok(path)
}

/// Creates a leaf cgroup under `root`, moves the current process into it and
/// applies the configured limits.
pub(crate) fn create_leaf(root: &Path, limits: &LeafLimits<'_>) -> Result<()> {
    let path = unique_dir(root, "job-")?;

    let mut entries: Vec<(&str, String)> = vec![("cgroup.procs", process::id().to_string())];

    if let Some(cpu_max) = limits.cpu_max {
        entries.push(("cpu.max", cpu_max.to_string()));
    }
    if let Some(memory_max) = limits.memory_max {
        entries.push(("memory.max", memory_max.to_string()));
    }
    if limits.riops_max > 0 || limits.wiops_max > 0 {
        for device in limits.block_devices {
            let mut row = device.clone();
            if limits.riops_max > 0 {
                row.push_str(&format!(" riops={}", limits.riops_max));
            }
            if limits.wiops_max > 0 {
                row.push_str(&format!(" wiops={}", limits.wiops_max));
            }
            entries.push(("io.max", row));
        }
    }

    for (file, value) in entries {
        write_file(&path.join(file), &value)?;
    }

    Ok(())
}

/// Lists block devices as `MAJOR:MINOR` strings for io limits.
///
/// Devices come from `/sys/block` minus loop devices; major/minor numbers
/// come from the `/proc/partitions` lines whose final field matches one of
/// the kept names.
pub(crate) fn block_devices() -> Result<Vec<String>> {
    let dir = fs::read_dir("/sys/block")
        .map_err(|err| Error::CgroupSetup(format!("error reading /sys/block: {err}")))?;

    let mut names = Vec::new();
    for entry in dir {
        let entry =
            entry.map_err(|err| Error::CgroupSetup(format!("error reading /sys/block: {err}")))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("loop") {
            continue;
        }
        names.push(name);
    }

    let partitions = fs::read_to_string("/proc/partitions")
        .map_err(|err| Error::CgroupSetup(format!("error reading /proc/partitions: {err}")))?;

    // lines look like:
    //  253        0  104857600 vda
    let mut devices = Vec::with_capacity(names.len());
    for line in partitions.lines() {
        for name in &names {
            if line.ends_with(name.as_str()) {
                let mut fields = line.split_whitespace();
                if let (Some(major), Some(minor)) = (fields.next(), fields.next()) {
                    devices.push(format!("{major}:{minor}"));
                }
                break;
            }
        }
    }

    Ok(devices)
}

fn unique_dir(parent: &Path, prefix: &str) -> Result<PathBuf> {
    let path = parent.join(format!("{prefix}{}", Uuid::new_v4().simple()));
    fs::create_dir(&path).map_err(|err| {
        Error::CgroupSetup(format!("error creating cgroup {}: {err}", path.display()))
    })?;
    Ok(path)
}

fn write_file(path: &Path, value: &str) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .mode(CGROUP_FILE_MODE)
        .open(path)
        .and_then(|mut file| file.write_all(value.as_bytes()))
        .map_err(|err| {
            Error::CgroupSetup(format!(
                "error writing {value:?} to cgroup file {}: {err}",
                path.display()
            ))
        })
}
