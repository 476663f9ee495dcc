pub mod bitmap;
pub mod error;
pub mod extension;
pub mod groupdescriptor;
pub mod image;
pub mod report;
pub mod superblock;

use bitmap::{BlockIndexRule, FreeSpaceScan, GroupCheck, InodeBoundRule, ScanRules};
use error::Result;
use extension::{MetadataPass, PassContext};
use groupdescriptor::{GroupCountRule, GroupDescriptor, GroupSummary};
use image::ReadAt;
use log::{info, warn};
use superblock::{FragmentSizeRule, Superblock};

/// Choices for the places where ext2 dumpers historically disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    pub fragment_size: FragmentSizeRule,
    pub group_count: GroupCountRule,
    pub inode_bound: InodeBoundRule,
    pub block_index: BlockIndexRule,
}

impl DecodeOptions {
    /// Sign-dropping fragment size, truncating group count, inclusive inode
    /// bound and positional block indices.
    pub fn legacy() -> Self {
        DecodeOptions {
            fragment_size: FragmentSizeRule::Legacy,
            group_count: GroupCountRule::Truncating,
            inode_bound: InodeBoundRule::Inclusive,
            block_index: BlockIndexRule::ScanPosition,
        }
    }

    /// Follow the on-disk format as the kernel reads it.
    pub fn conventional() -> Self {
        DecodeOptions {
            fragment_size: FragmentSizeRule::Conventional,
            group_count: GroupCountRule::Ceiling,
            inode_bound: InodeBoundRule::Exclusive,
            block_index: BlockIndexRule::Absolute,
        }
    }

    pub fn scan_rules(&self) -> ScanRules {
        ScanRules {
            group_count: self.group_count,
            inode_bound: self.inode_bound,
            block_index: self.block_index,
        }
    }
}

/// Struct representing a decoded ext2 image.
///
/// Built once by [`Ext2Image::open`]; the superblock and descriptor table
/// never change afterwards.
pub struct Ext2Image<R: ReadAt> {
    body: R,
    pub superblock: Superblock,
    descriptors: Vec<GroupDescriptor>,
    options: DecodeOptions,
}

impl<R: ReadAt> Ext2Image<R> {
    /// Decode the superblock, then the group descriptor table.
    pub fn open(body: R, options: DecodeOptions) -> Result<Self> {
        let superblock = superblock::decode_superblock(&body, options.fragment_size)?;
        let descriptors =
            groupdescriptor::decode_group_descriptors(&body, &superblock, options.group_count)?;

        let covered = descriptors.len() as u64 * superblock.blocks_per_group();
        if covered < superblock.blocks_count() && options.group_count == GroupCountRule::Truncating
        {
            warn!(
                "{} blocks are not covered by a whole group; they are folded into the last group",
                superblock.blocks_count() - covered
            );
        }
        info!(
            "Decoded {} block groups of {} blocks",
            descriptors.len(),
            superblock.s_blocks_per_group
        );

        Ok(Ext2Image {
            body,
            superblock,
            descriptors,
            options,
        })
    }

    pub fn body(&self) -> &R {
        &self.body
    }

    pub fn options(&self) -> DecodeOptions {
        self.options
    }

    pub fn group_descriptors(&self) -> &[GroupDescriptor] {
        &self.descriptors
    }

    pub fn group_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn blocks_in_group(&self, index: usize) -> u64 {
        self.options.group_count.blocks_in_group(
            &self.superblock,
            index as u64,
            self.descriptors.len() as u64,
        )
    }

    pub fn group_summaries(&self) -> Vec<GroupSummary> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, gd)| GroupSummary::new(gd, self.blocks_in_group(i)))
            .collect()
    }

    /// Lazily enumerate free blocks and inodes, group by group.
    ///
    /// Each call starts over and re-reads the bitmaps from the image.
    pub fn free_resources(&self) -> FreeSpaceScan<'_, R> {
        FreeSpaceScan::new(
            &self.body,
            &self.superblock,
            &self.descriptors,
            self.options.scan_rules(),
        )
    }

    /// Compare bitmap-derived free counts with the descriptor counters.
    pub fn verify_free_counts(&self) -> Result<Vec<GroupCheck>> {
        bitmap::verify_free_counts(
            &self.body,
            &self.superblock,
            &self.descriptors,
            self.options.group_count,
        )
    }

    pub fn run_pass<P: MetadataPass>(&self, pass: &P) -> Result<Vec<P::Record>> {
        let ctx = PassContext {
            image: &self.body,
            superblock: &self.superblock,
            descriptors: &self.descriptors,
            name: pass.name(),
        };
        info!("Running {} pass", pass.name());
        pass.run(&ctx)
    }
}
