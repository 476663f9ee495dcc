#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};
use exhume_ext2::groupdescriptor::GroupDescriptor;

pub const BLOCK_SIZE: usize = 1024;

/// Geometry and contents of a synthetic ext2 image.
pub struct ImageBuilder {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub log_frag_size: i32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub magic: u16,
    pub descriptors: Vec<GroupDescriptor>,
    pub blocks: Vec<(u32, Vec<u8>)>,
    pub image_blocks: usize,
}

impl ImageBuilder {
    pub fn block_size(&self) -> usize {
        1024 << self.log_block_size
    }

    pub fn superblock_bytes(&self) -> Vec<u8> {
        let mut sb = vec![0u8; 1024];
        LittleEndian::write_u32(&mut sb[0x00..], self.inodes_count);
        LittleEndian::write_u32(&mut sb[0x04..], self.blocks_count);
        LittleEndian::write_u32(&mut sb[0x0C..], self.free_blocks_count);
        LittleEndian::write_u32(&mut sb[0x10..], self.free_inodes_count);
        LittleEndian::write_u32(&mut sb[0x14..], self.first_data_block);
        LittleEndian::write_u32(&mut sb[0x18..], self.log_block_size);
        LittleEndian::write_i32(&mut sb[0x1C..], self.log_frag_size);
        LittleEndian::write_u32(&mut sb[0x20..], self.blocks_per_group);
        LittleEndian::write_u32(&mut sb[0x24..], self.blocks_per_group);
        LittleEndian::write_u32(&mut sb[0x28..], self.inodes_per_group);
        LittleEndian::write_u32(&mut sb[0x2C..], 1_700_000_000);
        LittleEndian::write_u16(&mut sb[0x38..], self.magic);
        LittleEndian::write_u16(&mut sb[0x3A..], 1);
        sb
    }

    pub fn build(&self) -> Vec<u8> {
        let bs = self.block_size();
        let mut image = vec![0u8; self.image_blocks * bs];
        image[1024..2048].copy_from_slice(&self.superblock_bytes());

        let table_start = (self.first_data_block as usize + 1) * bs;
        for (i, gd) in self.descriptors.iter().enumerate() {
            let at = table_start + i * 32;
            image[at..at + 32].copy_from_slice(&gd.to_bytes());
        }
        for (block, data) in &self.blocks {
            let at = *block as usize * bs;
            image[at..at + data.len()].copy_from_slice(data);
        }
        image
    }
}

fn descriptor(bitmap_base: u32, free_blocks: u16, free_inodes: u16, dirs: u16) -> GroupDescriptor {
    GroupDescriptor {
        bg_block_bitmap: bitmap_base,
        bg_inode_bitmap: bitmap_base + 1,
        bg_inode_table: bitmap_base + 2,
        bg_free_blocks_count: free_blocks,
        bg_free_inodes_count: free_inodes,
        bg_used_dirs_count: dirs,
        bg_pad: 0,
        bg_reserved: [0; 3],
    }
}

/// Two groups of 8192 blocks / 2048 inodes with 1 KiB blocks.
///
/// Group 0: block bitmap at 3 with only bit 0 allocated, inode bitmap at 4
/// with bits 1..=10 allocated, inode table at 5.
/// Group 1: block bitmap at 6 with bits 0..16 and bit 8191 allocated, inode
/// bitmap at 7 all free, inode table at 8.
pub fn two_group_builder() -> ImageBuilder {
    let mut bb0 = vec![0u8; BLOCK_SIZE];
    bb0[0] = 0x01;
    let mut ib0 = vec![0u8; BLOCK_SIZE];
    ib0[0] = 0xFE;
    ib0[1] = 0x07;
    let mut bb1 = vec![0u8; BLOCK_SIZE];
    bb1[0] = 0xFF;
    bb1[1] = 0xFF;
    bb1[BLOCK_SIZE - 1] = 0x80;
    let ib1 = vec![0u8; BLOCK_SIZE];
    let mut table0 = vec![0u8; BLOCK_SIZE];
    table0[..4].copy_from_slice(b"ino0");

    ImageBuilder {
        inodes_count: 4096,
        blocks_count: 16384,
        free_blocks_count: 8191 + 8175,
        free_inodes_count: 2038 + 2048,
        first_data_block: 1,
        log_block_size: 0,
        log_frag_size: 0,
        blocks_per_group: 8192,
        inodes_per_group: 2048,
        magic: 0xEF53,
        descriptors: vec![descriptor(3, 8191, 2038, 2), descriptor(6, 8175, 2048, 0)],
        blocks: vec![(3, bb0), (4, ib0), (5, table0), (6, bb1), (7, ib1)],
        image_blocks: 8,
    }
}

pub fn two_group_image() -> Vec<u8> {
    two_group_builder().build()
}
