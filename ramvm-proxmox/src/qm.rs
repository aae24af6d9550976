//! Shell command lines for the Proxmox node.
//!
//! Every remote command the crate issues is built here so the wire surface
//! lives in one place.

/// Directory holding one `<vmid>.conf` per VM.
pub const QEMU_CONFIG_DIR: &str = "/etc/pve/qemu-server";

/// Subdirectories a Proxmox directory storage expects.
pub const STORAGE_LAYOUT: [&str; 4] = ["images", "snippets", "iso", "dump"];

pub fn status(vm_id: u32) -> String {
    format!("qm status {}", vm_id)
}

pub fn stop(vm_id: u32) -> String {
    format!("qm stop {} --skiplock", vm_id)
}

pub fn destroy(vm_id: u32) -> String {
    format!("qm destroy {} --skiplock --purge", vm_id)
}

pub fn start(vm_id: u32) -> String {
    format!("qm start {}", vm_id)
}

/// Clone `template_id` at `snapshot` onto `storage`, then set CPU, agent
/// and memory on the new VM.
pub fn clone_and_configure(
    template_id: u32,
    vm_id: u32,
    snapshot: &str,
    storage: &str,
    memory_mib: u32,
) -> String {
    format!(
        "qm clone {} {} --snapname {} --storage {} && qm set {} --cpu host --agent 1 --memory {}",
        template_id, vm_id, snapshot, storage, vm_id, memory_mib
    )
}

pub fn guest_network_interfaces(vm_id: u32) -> String {
    format!("qm guest cmd {} network-get-interfaces", vm_id)
}

/// Mount table filtered for exactly `path`. Always exits zero.
pub fn mount_check(path: &str) -> String {
    format!("mount | grep ' {} ' || true", path)
}

pub fn unmount(path: &str) -> String {
    format!("umount {} || true", path)
}

pub fn mkdir(path: &str) -> String {
    format!("mkdir -p {}", path)
}

/// `size_gb = None` leaves the size to the kernel default (half of RAM).
pub fn mount_tmpfs(path: &str, size_gb: Option<u32>) -> String {
    match size_gb {
        Some(size) => format!("mount -t tmpfs -o size={}G tmpfs {}", size, path),
        None => format!("mount -t tmpfs tmpfs {}", path),
    }
}

pub fn mkdir_layout(path: &str) -> String {
    format!("mkdir -p {}/{{{}}}", path, STORAGE_LAYOUT.join(","))
}

pub fn list_vm_configs() -> String {
    format!("ls {}/*.conf", QEMU_CONFIG_DIR)
}

pub fn read_file(path: &str) -> String {
    format!("cat {}", path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_uses_brace_expansion() {
        assert_eq!(
            mkdir_layout("/mnt/ram"),
            "mkdir -p /mnt/ram/{images,snippets,iso,dump}"
        );
    }

    #[test]
    fn test_mount_tmpfs_size() {
        assert_eq!(
            mount_tmpfs("/mnt/ram", Some(16)),
            "mount -t tmpfs -o size=16G tmpfs /mnt/ram"
        );
        assert_eq!(mount_tmpfs("/mnt/ram", None), "mount -t tmpfs tmpfs /mnt/ram");
    }

    #[test]
    fn test_clone_and_configure() {
        assert_eq!(
            clone_and_configure(9000, 200, "clean", "ram", 4096),
            "qm clone 9000 200 --snapname clean --storage ram && \
             qm set 200 --cpu host --agent 1 --memory 4096"
        );
    }
}
