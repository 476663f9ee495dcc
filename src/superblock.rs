/// Reference: https://www.nongnu.org/ext2-doc/ext2.html#superblock
use crate::error::{Ext2Error, Result, Stage};
use crate::image::ReadAt;
use byteorder::{ByteOrder, LittleEndian};
use chrono::{TimeZone, Utc};
use log::info;
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use serde_json::{json, Value};

pub const SUPERBLOCK_OFFSET: u64 = 1024;
pub const SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_MAGIC: u16 = 0xEF53;

/// Largest block size exponent accepted (64 KiB blocks).
const MAX_LOG_BLOCK_SIZE: u32 = 6;
/// Largest magnitude accepted for the signed fragment exponent.
const MAX_LOG_FRAG_MAGNITUDE: u32 = 20;

/// How a negative `s_log_frag_size` is turned into a byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FragmentSizeRule {
    /// `1024 >> -v`: negative exponents give fragments smaller than 1 KiB.
    #[default]
    Conventional,
    /// `1024 << -v`: the sign is dropped.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Superblock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_r_blocks_count: u32,
    pub s_free_blocks_count: u32,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_log_frag_size: i32,
    pub s_blocks_per_group: u32,
    pub s_frags_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_mtime: u32,
    pub s_wtime: u32,
    pub s_mnt_count: u16,
    pub s_max_mnt_count: u16,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_errors: u16,
    pub s_minor_rev_level: u16,
    pub s_lastcheck: u32,
    pub s_checkinterval: u32,
    pub s_creator_os: u32,
    pub s_rev_level: u32,
    pub s_def_resuid: u16,
    pub s_def_resgid: u16,
    /// Derived from `s_log_block_size`.
    pub block_size: u32,
    /// Derived from `s_log_frag_size` under the selected rule.
    pub fragment_size: u32,
}

/// The one-line superblock record of `super.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuperblockSummary {
    pub magic: u16,
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub block_size: u32,
    pub fragment_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub frags_per_group: u32,
    pub first_data_block: u32,
}

impl SuperblockSummary {
    pub fn to_csv_line(&self) -> String {
        format!(
            "{:x},{},{},{},{},{},{},{},{}",
            self.magic,
            self.inodes_count,
            self.blocks_count,
            self.block_size,
            self.fragment_size,
            self.blocks_per_group,
            self.inodes_per_group,
            self.frags_per_group,
            self.first_data_block
        )
    }
}

/// `1024 << log_block_size`, rejecting exponents past 64 KiB.
pub fn block_size_from_log(log_block_size: u32) -> Result<u32> {
    if log_block_size > MAX_LOG_BLOCK_SIZE {
        return Err(Ext2Error::InvalidFilesystem(format!(
            "block size exponent {} is out of range",
            log_block_size
        )));
    }
    Ok(1024 << log_block_size)
}

pub fn fragment_size_from_log(log_frag_size: i32, rule: FragmentSizeRule) -> Result<u32> {
    let magnitude = log_frag_size.unsigned_abs();
    if magnitude > MAX_LOG_FRAG_MAGNITUDE {
        return Err(Ext2Error::InvalidFilesystem(format!(
            "fragment size exponent {} is out of range",
            log_frag_size
        )));
    }
    let size = if log_frag_size >= 0 {
        1024u32 << magnitude
    } else {
        match rule {
            FragmentSizeRule::Conventional => 1024u32 >> magnitude,
            FragmentSizeRule::Legacy => 1024u32 << magnitude,
        }
    };
    if size == 0 {
        return Err(Ext2Error::InvalidFilesystem(format!(
            "fragment size exponent {} yields an empty fragment",
            log_frag_size
        )));
    }
    Ok(size)
}

fn format_time(ts: u32) -> String {
    if ts == 0 {
        return String::new();
    }
    Utc.timestamp_opt(ts as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

impl Superblock {
    /// Decode the 1024-byte superblock record.
    pub fn from_bytes(data: &[u8], rule: FragmentSizeRule) -> Result<Self> {
        if data.len() < SUPERBLOCK_SIZE {
            return Err(Ext2Error::TruncatedImage {
                stage: Stage::Superblock,
                offset: SUPERBLOCK_OFFSET,
                needed: SUPERBLOCK_SIZE,
                read: data.len(),
            });
        }
        let le_u16 = |offset: usize| -> u16 { LittleEndian::read_u16(&data[offset..offset + 2]) };
        let le_u32 = |offset: usize| -> u32 { LittleEndian::read_u32(&data[offset..offset + 4]) };

        let s_magic = le_u16(0x38);
        if s_magic != EXT2_MAGIC {
            return Err(Ext2Error::InvalidFilesystem(format!(
                "bad magic 0x{:04x}, expected 0x{:04x}",
                s_magic, EXT2_MAGIC
            )));
        }

        let s_log_block_size = le_u32(0x18);
        let s_log_frag_size = LittleEndian::read_i32(&data[0x1C..0x20]);
        let s_blocks_per_group = le_u32(0x20);
        let s_inodes_per_group = le_u32(0x28);
        if s_blocks_per_group == 0 {
            return Err(Ext2Error::InvalidFilesystem(
                "blocks per group is zero".to_string(),
            ));
        }
        if s_inodes_per_group == 0 {
            return Err(Ext2Error::InvalidFilesystem(
                "inodes per group is zero".to_string(),
            ));
        }

        Ok(Superblock {
            s_inodes_count: le_u32(0x00),
            s_blocks_count: le_u32(0x04),
            s_r_blocks_count: le_u32(0x08),
            s_free_blocks_count: le_u32(0x0C),
            s_free_inodes_count: le_u32(0x10),
            s_first_data_block: le_u32(0x14),
            s_log_block_size,
            s_log_frag_size,
            s_blocks_per_group,
            s_frags_per_group: le_u32(0x24),
            s_inodes_per_group,
            s_mtime: le_u32(0x2C),
            s_wtime: le_u32(0x30),
            s_mnt_count: le_u16(0x34),
            s_max_mnt_count: le_u16(0x36),
            s_magic,
            s_state: le_u16(0x3A),
            s_errors: le_u16(0x3C),
            s_minor_rev_level: le_u16(0x3E),
            s_lastcheck: le_u32(0x40),
            s_checkinterval: le_u32(0x44),
            s_creator_os: le_u32(0x48),
            s_rev_level: le_u32(0x4C),
            s_def_resuid: le_u16(0x50),
            s_def_resgid: le_u16(0x52),
            block_size: block_size_from_log(s_log_block_size)?,
            fragment_size: fragment_size_from_log(s_log_frag_size, rule)?,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size as u64
    }

    pub fn blocks_count(&self) -> u64 {
        self.s_blocks_count as u64
    }

    pub fn blocks_per_group(&self) -> u64 {
        self.s_blocks_per_group as u64
    }

    pub fn inodes_per_group(&self) -> u64 {
        self.s_inodes_per_group as u64
    }

    pub fn first_data_block(&self) -> u64 {
        self.s_first_data_block as u64
    }

    pub fn summary(&self) -> SuperblockSummary {
        SuperblockSummary {
            magic: self.s_magic,
            inodes_count: self.s_inodes_count,
            blocks_count: self.s_blocks_count,
            block_size: self.block_size,
            fragment_size: self.fragment_size,
            blocks_per_group: self.s_blocks_per_group,
            inodes_per_group: self.s_inodes_per_group,
            frags_per_group: self.s_frags_per_group,
            first_data_block: self.s_first_data_block,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "magic": format!("0x{:04x}", self.s_magic),
            "inodes_count": self.s_inodes_count,
            "blocks_count": self.s_blocks_count,
            "r_blocks_count": self.s_r_blocks_count,
            "free_blocks_count": self.s_free_blocks_count,
            "free_inodes_count": self.s_free_inodes_count,
            "first_data_block": self.s_first_data_block,
            "block_size": self.block_size,
            "fragment_size": self.fragment_size,
            "blocks_per_group": self.s_blocks_per_group,
            "frags_per_group": self.s_frags_per_group,
            "inodes_per_group": self.s_inodes_per_group,
            "mtime": format_time(self.s_mtime),
            "wtime": format_time(self.s_wtime),
            "lastcheck": format_time(self.s_lastcheck),
            "mnt_count": self.s_mnt_count,
            "max_mnt_count": self.s_max_mnt_count,
            "state": self.s_state,
            "errors": self.s_errors,
            "rev_level": format!("{}.{}", self.s_rev_level, self.s_minor_rev_level),
            "creator_os": self.s_creator_os,
        })
    }

    /// String representation of the superblock using prettytable
    pub fn to_table(&self) -> String {
        let mut table = Table::new();
        let rows: Vec<(&str, String)> = vec![
            ("Magic", format!("0x{:04x}", self.s_magic)),
            ("Inodes", format!("{}", self.s_inodes_count)),
            ("Blocks", format!("{}", self.s_blocks_count)),
            ("Reserved Blocks", format!("{}", self.s_r_blocks_count)),
            ("Free Blocks", format!("{}", self.s_free_blocks_count)),
            ("Free Inodes", format!("{}", self.s_free_inodes_count)),
            ("First Data Block", format!("{}", self.s_first_data_block)),
            ("Block Size", format!("{}", self.block_size)),
            ("Fragment Size", format!("{}", self.fragment_size)),
            ("Blocks Per Group", format!("{}", self.s_blocks_per_group)),
            ("Fragments Per Group", format!("{}", self.s_frags_per_group)),
            ("Inodes Per Group", format!("{}", self.s_inodes_per_group)),
            ("Mount Time", format_time(self.s_mtime)),
            ("Write Time", format_time(self.s_wtime)),
            ("Last Check", format_time(self.s_lastcheck)),
            ("State", format!("0x{:x}", self.s_state)),
            (
                "Revision",
                format!("{}.{}", self.s_rev_level, self.s_minor_rev_level),
            ),
        ];
        for (name, value) in rows {
            table.add_row(Row::new(vec![Cell::new(name), Cell::new(&value)]));
        }
        table.to_string()
    }
}

/// Read and decode the superblock at byte 1024 of the image.
pub fn decode_superblock<R: ReadAt + ?Sized>(
    image: &R,
    rule: FragmentSizeRule,
) -> Result<Superblock> {
    let data = image
        .read_at(SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)
        .map_err(|e| e.during(Stage::Superblock))?;
    let superblock = Superblock::from_bytes(&data, rule)?;
    info!(
        "Superblock: {} blocks of {} bytes, {} per group",
        superblock.s_blocks_count, superblock.block_size, superblock.s_blocks_per_group
    );
    Ok(superblock)
}
