//! ELF image queries against hand-built images.

use libtdb::binary::{BINARY_FORMATS, BinaryImage, Elf32Image, Elf64Image, HeaderKind};
use libtdb::procfs::{Permissions, Region};
use libtdb::{MemoryAccess, TdbError, TdbResult, VirtAddr, create_binary_info};
use object::elf::{DT_DEBUG, DT_NEEDED, DT_NULL, ET_DYN, ET_EXEC, PT_DYNAMIC, PT_LOAD};

const REGION_START: u64 = 0x5555_5555_4000;
const LOAD_VADDR: u64 = 0x1000;
const DYNAMIC_VADDR: u64 = 0x3000;
const DECLARED_ENTRY: u64 = 0x1060;

struct Segment {
    p_type: u32,
    offset: u64,
    vaddr: u64,
    memsz: u64,
}

fn elf64(e_type: u16, entry: u64, segments: &[Segment]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&e_type.to_le_bytes());
    out.extend_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    out.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    assert_eq!(out.len(), 64);

    for seg in segments {
        out.extend_from_slice(&seg.p_type.to_le_bytes());
        out.extend_from_slice(&5u32.to_le_bytes()); // R+X
        out.extend_from_slice(&seg.offset.to_le_bytes());
        out.extend_from_slice(&seg.vaddr.to_le_bytes());
        out.extend_from_slice(&seg.vaddr.to_le_bytes());
        out.extend_from_slice(&seg.memsz.to_le_bytes());
        out.extend_from_slice(&seg.memsz.to_le_bytes());
        out.extend_from_slice(&0x1000u64.to_le_bytes());
    }
    out
}

fn pie_image() -> Vec<u8> {
    elf64(
        ET_DYN,
        DECLARED_ENTRY,
        &[
            Segment {
                p_type: PT_LOAD,
                offset: 0,
                vaddr: LOAD_VADDR,
                memsz: 0x2000,
            },
            Segment {
                p_type: PT_DYNAMIC,
                offset: 0x2000,
                vaddr: DYNAMIC_VADDR,
                memsz: 48,
            },
        ],
    )
}

fn static_image() -> Vec<u8> {
    elf64(
        ET_EXEC,
        0x401000,
        &[Segment {
            p_type: PT_LOAD,
            offset: 0,
            vaddr: 0x400000,
            memsz: 0x1000,
        }],
    )
}

fn region(start: u64) -> Region {
    Region {
        start: VirtAddr(start),
        end: VirtAddr(start + 0x1000),
        perms: Permissions {
            read: true,
            write: false,
            execute: false,
            private: true,
        },
        offset: 0,
        pathname: "/usr/bin/synthetic".to_string(),
    }
}

/// Sparse tracee memory made of fixed blocks.
#[derive(Default)]
struct FakeMemory {
    blocks: Vec<(u64, Vec<u8>)>,
}

impl FakeMemory {
    fn with(mut self, start: u64, bytes: Vec<u8>) -> Self {
        self.blocks.push((start, bytes));
        self
    }
}

impl MemoryAccess for FakeMemory {
    fn read_bytes(&self, addr: VirtAddr, buf: &mut [u8]) -> TdbResult<()> {
        for (start, bytes) in &self.blocks {
            let end = start + bytes.len() as u64;
            if addr.addr() >= *start && addr.addr() + buf.len() as u64 <= end {
                let from = (addr.addr() - start) as usize;
                buf.copy_from_slice(&bytes[from..from + buf.len()]);
                return Ok(());
            }
        }
        Err(TdbError::MemoryAccessFault {
            address: addr,
            transferred: 0,
            requested: buf.len(),
        })
    }

    fn write_bytes(&self, addr: VirtAddr, data: &[u8]) -> TdbResult<()> {
        Err(TdbError::MemoryAccessFault {
            address: addr,
            transferred: 0,
            requested: data.len(),
        })
    }
}

fn dynamic_section(debug: u64) -> Vec<u8> {
    let mut out = Vec::new();
    for (tag, val) in [(u64::from(DT_NEEDED), 5u64), (u64::from(DT_DEBUG), debug), (u64::from(DT_NULL), 0)] {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&val.to_le_bytes());
    }
    out
}

/// region start minus (first PT_LOAD vaddr minus its file offset of zero).
fn load_bias() -> u64 {
    REGION_START - LOAD_VADDR
}

#[test]
fn pie_base_address_and_entry() {
    let image = Elf64Image::new(region(REGION_START), pie_image());
    assert!(image.is_valid());
    assert_eq!(image.format_name(), "ELF64");
    assert_eq!(image.base_address(), VirtAddr(load_bias()));
    assert_eq!(image.entry_point(), VirtAddr(load_bias() + DECLARED_ENTRY));
    assert_eq!(image.header_size(), 64);
    assert_eq!(&image.header()[..4], b"\x7fELF");
    assert_eq!(image.native(), cfg!(target_pointer_width = "64"));
}

#[test]
fn normalized_header_list() {
    let image = Elf64Image::new(region(REGION_START), pie_image());
    let headers = image.headers();
    let kinds: Vec<_> = headers.iter().map(|h| h.kind).collect();
    assert_eq!(
        kinds,
        vec![
            HeaderKind::File,
            HeaderKind::ProgramHeaderTable,
            HeaderKind::Segment(PT_LOAD),
            HeaderKind::Segment(PT_DYNAMIC),
        ]
    );
    assert_eq!(headers[0].address, VirtAddr(REGION_START));
    assert_eq!(headers[1].address, VirtAddr(REGION_START + 64));
    assert_eq!(headers[1].size, 2 * 56);
    assert_eq!(headers[3].address, VirtAddr(load_bias() + DYNAMIC_VADDR));
    assert_eq!(headers[3].kind.to_string(), "DYNAMIC");
}

#[test]
fn static_image_has_no_bias_or_debug_pointer() {
    let image = Elf64Image::new(region(0x400000), static_image());
    assert!(image.is_valid());
    assert_eq!(image.base_address(), VirtAddr(0));
    assert_eq!(image.entry_point(), VirtAddr(0x401000));
    assert_eq!(image.debug_pointer(&FakeMemory::default()), None);
}

#[test]
fn debug_pointer_from_dynamic_section() {
    let image = Elf64Image::new(region(REGION_START), pie_image());
    let r_debug = 0x7fff_f7ff_e118;
    let memory = FakeMemory::default().with(load_bias() + DYNAMIC_VADDR, dynamic_section(r_debug));
    assert_eq!(image.debug_pointer(&memory), Some(VirtAddr(r_debug)));
}

#[test]
fn debug_pointer_absent_until_linker_fills_it() {
    let image = Elf64Image::new(region(REGION_START), pie_image());
    let memory = FakeMemory::default().with(load_bias() + DYNAMIC_VADDR, dynamic_section(0));
    assert_eq!(image.debug_pointer(&memory), None);
    // Unreadable dynamic section.
    assert_eq!(image.debug_pointer(&FakeMemory::default()), None);
}

#[test]
fn main_recovered_from_entry_code() {
    let image = Elf64Image::new(region(REGION_START), pie_image());
    let entry = load_bias() + DECLARED_ENTRY;
    // mov $0x401136,%rdi; call *0x0(%rip)
    let mut code = vec![0x48, 0xc7, 0xc7, 0x36, 0x11, 0x40, 0x00, 0xff, 0x15, 0, 0, 0, 0];
    code.resize(64, 0x90);
    let memory = FakeMemory::default().with(entry, code);
    assert_eq!(image.calculate_main(&memory), Some(VirtAddr(0x401136)));
}

#[test]
fn corrupted_magic_is_inert() {
    let mut bytes = pie_image();
    bytes[1] = b'X';
    let image = Elf64Image::new(region(REGION_START), bytes.clone());
    assert!(!image.is_valid());
    assert_eq!(image.entry_point(), VirtAddr(0));
    assert_eq!(image.base_address(), VirtAddr(0));
    assert!(image.headers().is_empty());
    assert!(image.header().is_empty());
    assert!(!image.native());
    assert_eq!(image.debug_pointer(&FakeMemory::default()), None);
    assert!(create_binary_info(&region(REGION_START), &bytes).is_none());
}

#[test]
fn class_must_match_width() {
    let image = Elf32Image::new(region(REGION_START), pie_image());
    assert!(!image.is_valid());
    assert_eq!(image.format_name(), "ELF32");
    assert!(image.headers().is_empty());
}

#[test]
fn truncated_program_headers_rejected() {
    let mut bytes = pie_image();
    bytes.truncate(64 + 56);
    let image = Elf64Image::new(region(REGION_START), bytes);
    assert!(!image.is_valid());
    assert_eq!(image.entry_point(), VirtAddr(0));
}

#[test]
fn registry_picks_matching_width() {
    assert_eq!(
        BINARY_FORMATS.iter().map(|f| f.name).collect::<Vec<_>>(),
        vec!["ELF32", "ELF64"]
    );
    let image = create_binary_info(&region(REGION_START), &pie_image()).unwrap();
    assert_eq!(image.format_name(), "ELF64");
    assert_eq!(image.region().start, VirtAddr(REGION_START));
    assert!(create_binary_info(&region(REGION_START), b"#!/bin/sh\n").is_none());
}
