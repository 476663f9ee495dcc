use crate::error::{Result, Stage};
use crate::groupdescriptor::{GroupCountRule, GroupDescriptor};
use crate::image::ReadAt;
use crate::superblock::Superblock;
use log::{debug, warn};
use serde::Serialize;
use std::fmt;

pub trait BitmapExt {
    fn is_bit_set(&self, bit_index: usize) -> bool;

    /// Number of clear bits among the first `bits` bits.
    fn count_clear(&self, bits: usize) -> usize;
}

impl BitmapExt for [u8] {
    #[inline]
    fn is_bit_set(&self, bit_index: usize) -> bool {
        let byte = self[bit_index / 8];
        let mask = 1u8 << (bit_index % 8);
        byte & mask != 0
    }

    fn count_clear(&self, bits: usize) -> usize {
        let bits = bits.min(self.len() * 8);
        (0..bits).filter(|&b| !self.is_bit_set(b)).count()
    }
}

/// When the inode scan of a group stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InodeBoundRule {
    /// Keep scanning while `index <= bound`, admitting one bit past the
    /// group's last inode.
    #[default]
    Inclusive,
    /// Keep scanning while `index < bound`.
    Exclusive,
}

impl InodeBoundRule {
    #[inline]
    fn admits(&self, index: u64, bound: u64) -> bool {
        match self {
            InodeBoundRule::Inclusive => index <= bound,
            InodeBoundRule::Exclusive => index < bound,
        }
    }
}

/// What number a free block record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockIndexRule {
    /// Running count of every block bitmap bit examined, across groups.
    #[default]
    ScanPosition,
    /// The block's real number; padding bits past the group end are skipped.
    Absolute,
}

/// Rules steering the free-space scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanRules {
    pub group_count: GroupCountRule,
    pub inode_bound: InodeBoundRule,
    pub block_index: BlockIndexRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Block,
    Inode,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Block => write!(f, "block"),
            ResourceKind::Inode => write!(f, "inode"),
        }
    }
}

/// One free block or inode found in a bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreeResource {
    pub kind: ResourceKind,
    /// Block number of the bitmap the bit was found in.
    pub bitmap_block: u32,
    /// Zero-based index, continuous across groups.
    pub index: u64,
}

impl FreeResource {
    pub fn to_csv_line(&self) -> String {
        format!("{:x},{}", self.bitmap_block, self.index)
    }
}

/// Bits of a group's block bitmap that map to blocks below `s_blocks_count`.
///
/// The truncating group count folds `first_data_block` into the last group,
/// so its `blocks_in_group` can name one block past the end of the volume.
pub fn real_blocks_in_group(superblock: &Superblock, group: usize, blocks_in_group: u64) -> u64 {
    let group_start =
        superblock.first_data_block() + group as u64 * superblock.blocks_per_group();
    blocks_in_group.min(superblock.blocks_count().saturating_sub(group_start))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    LoadBlocks,
    Blocks,
    LoadInodes,
    Inodes,
    Done,
}

/// Lazy walk over every group's block bitmap then inode bitmap.
///
/// Bitmaps are read only when the walk reaches them. The first read error
/// is yielded once and ends the walk.
pub struct FreeSpaceScan<'a, R: ReadAt + ?Sized> {
    image: &'a R,
    superblock: &'a Superblock,
    descriptors: &'a [GroupDescriptor],
    rules: ScanRules,
    phase: Phase,
    group: usize,
    bitmap: Vec<u8>,
    bit: usize,
    blocks_in_group: u64,
    block_index: u64,
    inode_index: u64,
    inode_bound: u64,
}

impl<'a, R: ReadAt + ?Sized> FreeSpaceScan<'a, R> {
    pub fn new(
        image: &'a R,
        superblock: &'a Superblock,
        descriptors: &'a [GroupDescriptor],
        rules: ScanRules,
    ) -> Self {
        FreeSpaceScan {
            image,
            superblock,
            descriptors,
            rules,
            phase: Phase::LoadBlocks,
            group: 0,
            bitmap: Vec::new(),
            bit: 0,
            blocks_in_group: 0,
            block_index: 0,
            inode_index: 0,
            inode_bound: 0,
        }
    }

    fn read_bitmap(&mut self, block: u32, stage: Stage) -> Result<()> {
        let block_size = self.superblock.block_size();
        self.bitmap = self
            .image
            .read_at(block as u64 * block_size, block_size as usize)
            .map_err(|e| e.during(stage))?;
        self.bit = 0;
        Ok(())
    }

    fn next_free_block(&mut self) -> Option<FreeResource> {
        let bitmap_block = self.descriptors[self.group].bg_block_bitmap;
        let total_bits = self.bitmap.len() * 8;
        while self.bit < total_bits {
            let bit = self.bit;
            self.bit += 1;
            let index = match self.rules.block_index {
                BlockIndexRule::ScanPosition => {
                    let index = self.block_index;
                    self.block_index += 1;
                    index
                }
                BlockIndexRule::Absolute => {
                    if bit as u64 >= self.blocks_in_group {
                        self.bit = total_bits;
                        break;
                    }
                    self.superblock.first_data_block()
                        + self.group as u64 * self.superblock.blocks_per_group()
                        + bit as u64
                }
            };
            if !self.bitmap.is_bit_set(bit) {
                return Some(FreeResource {
                    kind: ResourceKind::Block,
                    bitmap_block,
                    index,
                });
            }
        }
        None
    }

    fn next_free_inode(&mut self) -> Option<FreeResource> {
        let bitmap_block = self.descriptors[self.group].bg_inode_bitmap;
        let total_bits = self.bitmap.len() * 8;
        while self.bit < total_bits {
            if !self.rules.inode_bound.admits(self.inode_index, self.inode_bound) {
                break;
            }
            let bit = self.bit;
            let index = self.inode_index;
            self.bit += 1;
            self.inode_index += 1;
            if !self.bitmap.is_bit_set(bit) {
                return Some(FreeResource {
                    kind: ResourceKind::Inode,
                    bitmap_block,
                    index,
                });
            }
        }
        None
    }
}

impl<R: ReadAt + ?Sized> Iterator for FreeSpaceScan<'_, R> {
    type Item = Result<FreeResource>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.phase {
                Phase::Done => return None,
                Phase::LoadBlocks => {
                    if self.group >= self.descriptors.len() {
                        self.phase = Phase::Done;
                        return None;
                    }
                    let block = self.descriptors[self.group].bg_block_bitmap;
                    let stage = Stage::BlockBitmap { group: self.group };
                    if let Err(e) = self.read_bitmap(block, stage) {
                        self.phase = Phase::Done;
                        return Some(Err(e));
                    }
                    let blocks_in_group = self.rules.group_count.blocks_in_group(
                        self.superblock,
                        self.group as u64,
                        self.descriptors.len() as u64,
                    );
                    self.blocks_in_group =
                        real_blocks_in_group(self.superblock, self.group, blocks_in_group);
                    debug!("Scanning block bitmap of group {} at block {}", self.group, block);
                    self.phase = Phase::Blocks;
                }
                Phase::Blocks => match self.next_free_block() {
                    Some(found) => return Some(Ok(found)),
                    None => self.phase = Phase::LoadInodes,
                },
                Phase::LoadInodes => {
                    let block = self.descriptors[self.group].bg_inode_bitmap;
                    let stage = Stage::InodeBitmap { group: self.group };
                    if let Err(e) = self.read_bitmap(block, stage) {
                        self.phase = Phase::Done;
                        return Some(Err(e));
                    }
                    self.inode_bound = (self.group as u64 + 1) * self.superblock.inodes_per_group();
                    debug!(
                        "Scanning inode bitmap of group {} at block {} up to inode index {}",
                        self.group, block, self.inode_bound
                    );
                    self.phase = Phase::Inodes;
                }
                Phase::Inodes => match self.next_free_inode() {
                    Some(found) => return Some(Ok(found)),
                    None => {
                        self.group += 1;
                        self.phase = Phase::LoadBlocks;
                    }
                },
            }
        }
    }
}

/// Bitmap-derived free counts of one group next to its descriptor's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupCheck {
    pub group: usize,
    pub blocks_in_group: u64,
    pub descriptor_free_blocks: u16,
    pub bitmap_free_blocks: u64,
    pub descriptor_free_inodes: u16,
    pub bitmap_free_inodes: u64,
}

impl GroupCheck {
    pub fn blocks_match(&self) -> bool {
        self.descriptor_free_blocks as u64 == self.bitmap_free_blocks
    }

    pub fn inodes_match(&self) -> bool {
        self.descriptor_free_inodes as u64 == self.bitmap_free_inodes
    }

    pub fn is_consistent(&self) -> bool {
        self.blocks_match() && self.inodes_match()
    }
}

/// Count clear bits in the real part of every group's bitmaps and compare
/// them with the descriptor counters.
pub fn verify_free_counts<R: ReadAt + ?Sized>(
    image: &R,
    superblock: &Superblock,
    descriptors: &[GroupDescriptor],
    rule: GroupCountRule,
) -> Result<Vec<GroupCheck>> {
    let block_size = superblock.block_size();
    let group_count = descriptors.len() as u64;
    let mut checks = Vec::with_capacity(descriptors.len());
    for (group, gd) in descriptors.iter().enumerate() {
        let blocks_in_group = real_blocks_in_group(
            superblock,
            group,
            rule.blocks_in_group(superblock, group as u64, group_count),
        );

        let block_bitmap = image
            .read_at(gd.bg_block_bitmap as u64 * block_size, block_size as usize)
            .map_err(|e| e.during(Stage::BlockBitmap { group }))?;
        let inode_bitmap = image
            .read_at(gd.bg_inode_bitmap as u64 * block_size, block_size as usize)
            .map_err(|e| e.during(Stage::InodeBitmap { group }))?;

        let check = GroupCheck {
            group,
            blocks_in_group,
            descriptor_free_blocks: gd.bg_free_blocks_count,
            bitmap_free_blocks: block_bitmap.count_clear(blocks_in_group as usize) as u64,
            descriptor_free_inodes: gd.bg_free_inodes_count,
            bitmap_free_inodes: inode_bitmap
                .count_clear(superblock.inodes_per_group() as usize)
                as u64,
        };
        if !check.blocks_match() {
            warn!(
                "Group {}: descriptor says {} free blocks, bitmap has {}",
                group, check.descriptor_free_blocks, check.bitmap_free_blocks
            );
        }
        if !check.inodes_match() {
            warn!(
                "Group {}: descriptor says {} free inodes, bitmap has {}",
                group, check.descriptor_free_inodes, check.bitmap_free_inodes
            );
        }
        checks.push(check);
    }
    Ok(checks)
}
