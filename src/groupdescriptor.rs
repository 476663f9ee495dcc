use crate::error::{Ext2Error, Result, Stage};
use crate::image::ReadAt;
use crate::superblock::Superblock;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use prettytable::{Cell, Row, Table};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// On-disk size of one ext2 group descriptor.
pub const DESCRIPTOR_SIZE: usize = 32;

/// How the number of block groups is derived from the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupCountRule {
    /// `blocks_count / blocks_per_group`; a trailing partial group is folded
    /// into the last full one.
    #[default]
    Truncating,
    /// `ceil((blocks_count - first_data_block) / blocks_per_group)`, the way
    /// the kernel counts groups.
    Ceiling,
}

impl GroupCountRule {
    pub fn group_count(&self, sb: &Superblock) -> u64 {
        let bpg = sb.blocks_per_group();
        match self {
            GroupCountRule::Truncating => sb.blocks_count() / bpg,
            GroupCountRule::Ceiling => sb
                .blocks_count()
                .saturating_sub(sb.first_data_block())
                .div_ceil(bpg),
        }
    }

    /// Number of blocks covered by group `index` out of `group_count`.
    ///
    /// Every group but the last holds `blocks_per_group`; the last one holds
    /// whatever remains.
    pub fn blocks_in_group(&self, sb: &Superblock, index: u64, group_count: u64) -> u64 {
        let bpg = sb.blocks_per_group();
        if group_count == 0 || index + 1 != group_count {
            return bpg;
        }
        match self {
            GroupCountRule::Truncating => sb.blocks_count().saturating_sub(index * bpg),
            GroupCountRule::Ceiling => sb
                .blocks_count()
                .saturating_sub(sb.first_data_block())
                .saturating_sub(index * bpg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    /// Block number of the block bitmap.
    pub bg_block_bitmap: u32,
    /// Block number of the inode bitmap.
    pub bg_inode_bitmap: u32,
    /// First block of the inode table.
    pub bg_inode_table: u32,
    pub bg_free_blocks_count: u16,
    pub bg_free_inodes_count: u16,
    pub bg_used_dirs_count: u16,
    pub bg_pad: u16,
    pub bg_reserved: [u32; 3],
}

impl GroupDescriptor {
    /// Parse a group descriptor from a raw slice.
    ///
    /// `data` must contain at least 32 bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let le_u16 = |offset: usize| -> u16 { LittleEndian::read_u16(&data[offset..offset + 2]) };
        let le_u32 = |offset: usize| -> u32 { LittleEndian::read_u32(&data[offset..offset + 4]) };

        GroupDescriptor {
            bg_block_bitmap: le_u32(0x00),
            bg_inode_bitmap: le_u32(0x04),
            bg_inode_table: le_u32(0x08),

            bg_free_blocks_count: le_u16(0x0C),
            bg_free_inodes_count: le_u16(0x0E),
            bg_used_dirs_count: le_u16(0x10),
            bg_pad: le_u16(0x12),

            bg_reserved: [le_u32(0x14), le_u32(0x18), le_u32(0x1C)],
        }
    }

    /// Serialise back into the 32-byte on-disk layout.
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut out = [0u8; DESCRIPTOR_SIZE];
        LittleEndian::write_u32(&mut out[0x00..0x04], self.bg_block_bitmap);
        LittleEndian::write_u32(&mut out[0x04..0x08], self.bg_inode_bitmap);
        LittleEndian::write_u32(&mut out[0x08..0x0C], self.bg_inode_table);

        LittleEndian::write_u16(&mut out[0x0C..0x0E], self.bg_free_blocks_count);
        LittleEndian::write_u16(&mut out[0x0E..0x10], self.bg_free_inodes_count);
        LittleEndian::write_u16(&mut out[0x10..0x12], self.bg_used_dirs_count);
        LittleEndian::write_u16(&mut out[0x12..0x14], self.bg_pad);

        LittleEndian::write_u32(&mut out[0x14..0x18], self.bg_reserved[0]);
        LittleEndian::write_u32(&mut out[0x18..0x1C], self.bg_reserved[1]);
        LittleEndian::write_u32(&mut out[0x1C..0x20], self.bg_reserved[2]);
        out
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

/// Re-encode a descriptor table in on-disk order.
pub fn encode_table(descriptors: &[GroupDescriptor]) -> Vec<u8> {
    descriptors.iter().flat_map(|gd| gd.to_bytes()).collect()
}

/// Byte offset of the descriptor table: the block right after the one
/// holding the superblock.
pub fn table_offset(sb: &Superblock) -> u64 {
    (sb.first_data_block() + 1) * sb.block_size()
}

/// Read the whole descriptor table in one contiguous read.
pub fn decode_group_descriptors<R: ReadAt + ?Sized>(
    image: &R,
    sb: &Superblock,
    rule: GroupCountRule,
) -> Result<Vec<GroupDescriptor>> {
    let group_count = rule.group_count(sb);
    let total = usize::try_from(group_count)
        .ok()
        .and_then(|n| n.checked_mul(DESCRIPTOR_SIZE))
        .ok_or_else(|| {
            Ext2Error::InvalidFilesystem(format!("{} block groups is too many", group_count))
        })?;
    let offset = table_offset(sb);
    let buffer = image
        .read_at(offset, total)
        .map_err(|e| e.during(Stage::GroupDescriptors))?;

    let descriptors: Vec<GroupDescriptor> = buffer
        .chunks_exact(DESCRIPTOR_SIZE)
        .map(GroupDescriptor::from_bytes)
        .collect();
    for (i, gd) in descriptors.iter().enumerate() {
        debug!(
            "Group {}: block bitmap {}, inode bitmap {}, inode table {}",
            i, gd.bg_block_bitmap, gd.bg_inode_bitmap, gd.bg_inode_table
        );
    }
    info!(
        "Loaded {} group descriptors from offset 0x{:x}",
        descriptors.len(),
        offset
    );
    Ok(descriptors)
}

/// One line of `group.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub blocks_in_group: u64,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    pub inode_bitmap: u32,
    pub block_bitmap: u32,
    pub inode_table: u32,
}

impl GroupSummary {
    pub fn new(gd: &GroupDescriptor, blocks_in_group: u64) -> Self {
        GroupSummary {
            blocks_in_group,
            free_blocks_count: gd.bg_free_blocks_count,
            free_inodes_count: gd.bg_free_inodes_count,
            used_dirs_count: gd.bg_used_dirs_count,
            inode_bitmap: gd.bg_inode_bitmap,
            block_bitmap: gd.bg_block_bitmap,
            inode_table: gd.bg_inode_table,
        }
    }

    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{:x},{:x},{:x}",
            self.blocks_in_group,
            self.free_blocks_count,
            self.free_inodes_count,
            self.used_dirs_count,
            self.inode_bitmap,
            self.block_bitmap,
            self.inode_table
        )
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

pub fn summaries_to_table(summaries: &[GroupSummary]) -> String {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Group"),
        Cell::new("Blocks"),
        Cell::new("Free Blocks"),
        Cell::new("Free Inodes"),
        Cell::new("Used Dirs"),
        Cell::new("Inode Bitmap"),
        Cell::new("Block Bitmap"),
        Cell::new("Inode Table"),
    ]));
    for (i, s) in summaries.iter().enumerate() {
        table.add_row(Row::new(vec![
            Cell::new(&format!("{}", i)),
            Cell::new(&format!("{}", s.blocks_in_group)),
            Cell::new(&format!("{}", s.free_blocks_count)),
            Cell::new(&format!("{}", s.free_inodes_count)),
            Cell::new(&format!("{}", s.used_dirs_count)),
            Cell::new(&format!("0x{:x}", s.inode_bitmap)),
            Cell::new(&format!("0x{:x}", s.block_bitmap)),
            Cell::new(&format!("0x{:x}", s.inode_table)),
        ]));
    }
    table.to_string()
}
