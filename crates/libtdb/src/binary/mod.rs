//! Executable image layout queries.
//!
//! A [`BinaryImage`] answers where an image loaded in the tracee starts
//! executing, how far it was relocated, and where the dynamic linker keeps
//! its debug rendezvous. Parsers are registered in [`BINARY_FORMATS`] and
//! tried in order by [`create_binary_info`].

use std::fmt;

use object::Endianness;
use object::elf::{FileHeader32, FileHeader64};

use crate::memory::MemoryAccess;
use crate::procfs::Region;
use crate::types::VirtAddr;

pub mod elf;

pub use elf::{Elf32Image, Elf64Image, ElfImage};

/// What a normalized header entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// The image's file header.
    File,
    /// The program header table.
    ProgramHeaderTable,
    /// One program header, tagged with its raw `p_type`.
    Segment(u32),
}

impl fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderKind::File => f.write_str("file header"),
            HeaderKind::ProgramHeaderTable => f.write_str("program headers"),
            HeaderKind::Segment(p_type) => match elf::segment_type_name(*p_type) {
                Some(name) => f.write_str(name),
                None => write!(f, "segment 0x{p_type:x}"),
            },
        }
    }
}

/// One entry of the normalized header list, in runtime addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: HeaderKind,
    pub address: VirtAddr,
    pub size: u64,
}

/// Query object over a parsed executable image.
///
/// An image that failed validation stays inert: every query answers zero,
/// empty or `None` and nothing is re-parsed.
pub trait BinaryImage: fmt::Debug {
    /// Name of the format that produced this image.
    fn format_name(&self) -> &'static str;

    fn is_valid(&self) -> bool;

    /// Mapping the image was read from.
    fn region(&self) -> &Region;

    /// Whether the image's word width matches the debugger's pointer width.
    fn native(&self) -> bool;

    /// Declared entry point adjusted by the load bias.
    fn entry_point(&self) -> VirtAddr;

    /// Load bias of a position-independent image, zero otherwise.
    fn base_address(&self) -> VirtAddr;

    /// Address of the dynamic linker's debug structure (`r_debug`), read
    /// from the dynamic section through `memory`.
    fn debug_pointer(&self, memory: &dyn MemoryAccess) -> Option<VirtAddr>;

    /// Best-effort recovery of `main` from the startup code at the entry
    /// point.
    fn calculate_main(&self, memory: &dyn MemoryAccess) -> Option<VirtAddr>;

    /// Size in bytes of the raw file header.
    fn header_size(&self) -> usize;

    /// Raw file header bytes.
    fn header(&self) -> &[u8];

    fn headers(&self) -> &[Header];
}

/// Constructor for one registered image format.
pub type BinaryFactory = fn(&Region, &[u8]) -> Option<Box<dyn BinaryImage>>;

/// A registered image format.
#[derive(Clone, Copy)]
pub struct BinaryFormat {
    pub name: &'static str,
    pub create: BinaryFactory,
}

impl fmt::Debug for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryFormat").field("name", &self.name).finish()
    }
}

/// Every image format the engine understands, tried in order.
pub static BINARY_FORMATS: [BinaryFormat; 2] = [
    BinaryFormat {
        name: "ELF32",
        create: elf::create::<FileHeader32<Endianness>>,
    },
    BinaryFormat {
        name: "ELF64",
        create: elf::create::<FileHeader64<Endianness>>,
    },
];

/// Build a query object for the image whose leading bytes are `data`,
/// mapped at `region`. Returns `None` when no registered format accepts it.
pub fn create_binary_info(region: &Region, data: &[u8]) -> Option<Box<dyn BinaryImage>> {
    BINARY_FORMATS.iter().find_map(|format| {
        let image = (format.create)(region, data)?;
        log::debug!("{} image recognised at {}", format.name, region.start);
        Some(image)
    })
}
