//! Hooks for metadata passes that build on the decoded geometry.
//!
//! Inode-table, directory-entry and indirect-block walks all start from the
//! superblock and the descriptor table; they plug in here as
//! [`MetadataPass`] implementors and return their own records.
use crate::error::{Ext2Error, Result, Stage};
use crate::groupdescriptor::GroupDescriptor;
use crate::image::ReadAt;
use crate::superblock::Superblock;

/// Read-only view handed to a pass.
pub struct PassContext<'a> {
    pub image: &'a dyn ReadAt,
    pub superblock: &'a Superblock,
    pub descriptors: &'a [GroupDescriptor],
    pub(crate) name: &'static str,
}

impl PassContext<'_> {
    /// Read one filesystem block by number.
    pub fn read_block(&self, block: u64) -> Result<Vec<u8>> {
        if block >= self.superblock.blocks_count() {
            return Err(Ext2Error::InvalidFilesystem(format!(
                "Requested block {} is out of range",
                block
            )));
        }
        let block_size = self.superblock.block_size();
        self.image
            .read_at(block * block_size, block_size as usize)
            .map_err(|e| e.during(Stage::Extension(self.name)))
    }
}

pub trait MetadataPass {
    type Record;

    fn name(&self) -> &'static str;

    fn run(&self, ctx: &PassContext<'_>) -> Result<Vec<Self::Record>>;
}
