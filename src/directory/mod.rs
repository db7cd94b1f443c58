//! Directory Module
//!
//! The authoritative name → {rank, address, last_seen} mapping kept by
//! the membership service, with rank assignment and expiry.

mod record;
mod store;

pub use record::NodeRecord;
pub use store::DirectoryStore;

/// Admin port for a rank: `base + rank`, if it fits in a port number
pub fn admin_port(base_port: u16, rank: u32) -> crate::Result<u16> {
    u16::try_from(rank)
        .ok()
        .and_then(|rank| base_port.checked_add(rank))
        .ok_or_else(|| {
            crate::Error::Config(format!(
                "admin port {} + rank {} exceeds 65535; lower node.admin_base_port",
                base_port, rank
            ))
        })
}

/// Admin address convention: `<host>:<base + rank>`
pub fn admin_address(host: &str, base_port: u16, rank: u32) -> crate::Result<String> {
    Ok(format!("{}:{}", host, admin_port(base_port, rank)?))
}

/// Where to reach a listed node: its registered address, else the convention
pub fn peer_address(entry: &crate::protocol::NodeEntry, base_port: u16) -> crate::Result<String> {
    match entry.address.as_deref() {
        Some(addr) if !addr.is_empty() => Ok(addr.to_string()),
        _ => admin_address(&entry.name, base_port, entry.rank),
    }
}
