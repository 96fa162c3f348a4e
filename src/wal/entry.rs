//! WAL row format.
//!
//! The engine treats a row as an opaque byte string produced by a
//! `RequestExecutor`; it never interprets row contents itself, only
//! assigns it an LSN/GSN and checksums it.

use serde::{Deserialize, Serialize};

use crate::types::{Gsn, HostId, Lsn};

/// Row header stored alongside the opaque body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowHeader {
    pub lsn: Lsn,
    pub gsn: Gsn,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub origin_host: HostId,
    pub checksum: u32,
    pub body_size: u32,
}

/// One WAL row: header plus the opaque body produced by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRow {
    pub header: RowHeader,
    pub body: Vec<u8>,
}

impl WalRow {
    pub fn new(lsn: Lsn, gsn: Gsn, origin_host: HostId, body: Vec<u8>) -> Self {
        let checksum = crc32fast::hash(&body);
        Self {
            header: RowHeader {
                lsn,
                gsn,
                timestamp: chrono::Utc::now(),
                origin_host,
                checksum,
                body_size: body.len() as u32,
            },
            body,
        }
    }

    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.body) == self.header.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_detects_tampering() {
        let mut row = WalRow::new(1, 1, 0, vec![1, 2, 3]);
        assert!(row.verify_checksum());
        row.body[0] ^= 0xff;
        assert!(!row.verify_checksum());
    }
}
