//! ELF images, generic over the 32/64-bit header layout.
//!
//! The raw structure definitions come from `object::elf`; the width is a
//! type parameter so validation and derivation exist exactly once.

use std::marker::PhantomData;
use std::mem;

use object::Endianness;
use object::elf::{
    DT_DEBUG, DT_NULL, ELFCLASS32, ELFCLASS64, ELFMAG, ET_DYN, FileHeader32, FileHeader64, Ident,
    PT_DYNAMIC, PT_LOAD,
};
use object::read::elf::{Dyn as _, FileHeader, ProgramHeader as _};

use super::{BinaryImage, Header, HeaderKind};
use crate::errors::{TdbError, TdbResult};
use crate::memory::MemoryAccess;
use crate::procfs::Region;
use crate::types::VirtAddr;

pub type Elf32Image = ElfImage<FileHeader32<Endianness>>;
pub type Elf64Image = ElfImage<FileHeader64<Endianness>>;

/// Upper bound on dynamic entries scanned for `DT_DEBUG`.
const MAX_DYNAMIC_ENTRIES: usize = 512;

/// Bytes of startup code inspected by [`ElfImage::calculate_main`].
const ENTRY_SCAN_LEN: usize = 64;

/// Fields derived once, at construction, from a validated header.
#[derive(Debug, Clone)]
struct Layout {
    endian: Endianness,
    header_size: usize,
    entry: u64,
    base: u64,
    /// Runtime address and size of `PT_DYNAMIC`.
    dynamic: Option<(VirtAddr, u64)>,
    headers: Vec<Header>,
}

/// An ELF image mapped in the tracee.
#[derive(Debug)]
pub struct ElfImage<Elf> {
    region: Region,
    data: Vec<u8>,
    layout: Option<Layout>,
    _width: PhantomData<Elf>,
}

/// Factory registered in [`BINARY_FORMATS`](super::BINARY_FORMATS).
pub(crate) fn create<Elf>(region: &Region, data: &[u8]) -> Option<Box<dyn BinaryImage>>
where
    Elf: FileHeader<Endian = Endianness> + 'static,
{
    if !data.starts_with(&ELFMAG) {
        return None;
    }
    let image = ElfImage::<Elf>::new(region.clone(), data.to_vec());
    image
        .is_valid()
        .then(|| Box::new(image) as Box<dyn BinaryImage>)
}

impl<Elf: FileHeader<Endian = Endianness>> ElfImage<Elf> {
    /// Parse `data`, the leading bytes of `region`. Validation happens here
    /// and only here; a failure leaves the image permanently inert.
    pub fn new(region: Region, data: Vec<u8>) -> Self {
        let layout = match Self::validate_header(&region, &data) {
            Ok(layout) => Some(layout),
            Err(err) => {
                log::debug!("ignoring image at {}: {err}", region.start);
                None
            }
        };
        Self {
            region,
            data,
            layout,
            _width: PhantomData,
        }
    }

    fn expected_class() -> u8 {
        if Elf::is_type_64_sized() {
            ELFCLASS64
        } else {
            ELFCLASS32
        }
    }

    fn validate_header(region: &Region, data: &[u8]) -> TdbResult<Layout> {
        let malformed = |msg: String| TdbError::MalformedImage(msg);

        if !data.starts_with(&ELFMAG) {
            return Err(malformed("bad ELF magic".into()));
        }
        let class = data
            .get(mem::offset_of!(Ident, class))
            .copied()
            .ok_or_else(|| malformed("truncated identification".into()))?;
        if class != Self::expected_class() {
            return Err(malformed(format!(
                "word class {class} does not match ELF class {}",
                Self::expected_class()
            )));
        }

        let header = Elf::parse(data).map_err(|e| malformed(e.to_string()))?;
        let endian = header.endian().map_err(|e| malformed(e.to_string()))?;
        let header_size = usize::from(header.e_ehsize(endian));
        if header_size < mem::size_of::<Elf>() || header_size > data.len() {
            return Err(malformed(format!("header size {header_size} out of range")));
        }
        // Also rejects tables reaching past the bytes we were handed.
        let segments = header
            .program_headers(endian, data)
            .map_err(|e| malformed(e.to_string()))?;

        let base = if header.e_type(endian) == ET_DYN {
            segments
                .iter()
                .find(|ph| ph.p_type(endian) == PT_LOAD)
                .map(|ph| {
                    let vaddr: u64 = ph.p_vaddr(endian).into();
                    let offset: u64 = ph.p_offset(endian).into();
                    region.start.addr().wrapping_sub(vaddr.wrapping_sub(offset))
                })
                .unwrap_or(0)
        } else {
            0
        };

        let phoff: u64 = header.e_phoff(endian).into();
        let table_size = u64::from(header.e_phentsize(endian)) * segments.len() as u64;
        let mut headers = vec![
            Header {
                kind: HeaderKind::File,
                address: region.start,
                size: header_size as u64,
            },
            Header {
                kind: HeaderKind::ProgramHeaderTable,
                address: region.start + phoff,
                size: table_size,
            },
        ];
        let mut dynamic = None;
        for ph in segments {
            let p_type = ph.p_type(endian);
            let vaddr: u64 = ph.p_vaddr(endian).into();
            let memsz: u64 = ph.p_memsz(endian).into();
            let address = VirtAddr(vaddr.wrapping_add(base));
            if p_type == PT_DYNAMIC && dynamic.is_none() {
                dynamic = Some((address, memsz));
            }
            headers.push(Header {
                kind: HeaderKind::Segment(p_type),
                address,
                size: memsz,
            });
        }

        Ok(Layout {
            endian,
            header_size,
            entry: header.e_entry(endian).into(),
            base,
            dynamic,
            headers,
        })
    }

    fn pointer_width() -> usize {
        if Elf::is_type_64_sized() { 8 } else { 4 }
    }
}

impl<Elf: FileHeader<Endian = Endianness>> BinaryImage for ElfImage<Elf> {
    fn format_name(&self) -> &'static str {
        if Elf::is_type_64_sized() { "ELF64" } else { "ELF32" }
    }

    fn is_valid(&self) -> bool {
        self.layout.is_some()
    }

    fn region(&self) -> &Region {
        &self.region
    }

    fn native(&self) -> bool {
        self.is_valid() && Self::pointer_width() == mem::size_of::<usize>()
    }

    fn entry_point(&self) -> VirtAddr {
        self.layout
            .as_ref()
            .map_or(VirtAddr::NULL, |l| VirtAddr(l.entry.wrapping_add(l.base)))
    }

    fn base_address(&self) -> VirtAddr {
        self.layout
            .as_ref()
            .map_or(VirtAddr::NULL, |l| VirtAddr(l.base))
    }

    fn debug_pointer(&self, memory: &dyn MemoryAccess) -> Option<VirtAddr> {
        let layout = self.layout.as_ref()?;
        let (address, size) = layout.dynamic?;
        let entry_size = mem::size_of::<Elf::Dyn>();
        let count = (size as usize / entry_size).min(MAX_DYNAMIC_ENTRIES);
        let bytes = match memory.read_vec(address, count * entry_size) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("dynamic section at {address} unreadable: {err}");
                return None;
            }
        };
        let (entries, _) = object::pod::slice_from_bytes::<Elf::Dyn>(&bytes, count).ok()?;
        let endian = layout.endian;
        for entry in entries {
            let tag: u64 = entry.d_tag(endian).into();
            if tag == u64::from(DT_NULL) {
                break;
            }
            if tag == u64::from(DT_DEBUG) {
                let value: u64 = entry.d_val(endian).into();
                // Zero until the dynamic linker has initialised r_debug.
                return (value != 0).then_some(VirtAddr(value));
            }
        }
        None
    }

    fn calculate_main(&self, memory: &dyn MemoryAccess) -> Option<VirtAddr> {
        if !self.is_valid() {
            return None;
        }
        let entry = self.entry_point();
        let code = memory.read_vec(entry, ENTRY_SCAN_LEN).ok()?;
        find_main_argument(&code, entry, Elf::is_type_64_sized())
    }

    fn header_size(&self) -> usize {
        self.layout.as_ref().map_or(0, |l| l.header_size)
    }

    fn header(&self) -> &[u8] {
        &self.data[..self.header_size()]
    }

    fn headers(&self) -> &[Header] {
        self.layout.as_ref().map_or(&[], |l| l.headers.as_slice())
    }
}

/// Scan `_start` for the argument handed to `__libc_start_main`: the last
/// `main` candidate loaded before the first call instruction.
///
/// Recognised loads are `mov $imm32,%rdi`, `lea disp32(%rip),%rdi` (64-bit)
/// and `push $imm32` (32-bit).
fn find_main_argument(code: &[u8], entry: VirtAddr, is_64: bool) -> Option<VirtAddr> {
    let imm32 = |at: usize| -> Option<i32> {
        let bytes = code.get(at..at + 4)?;
        Some(i32::from_le_bytes(bytes.try_into().ok()?))
    };

    let mut candidate = None;
    let mut i = 0;
    while i < code.len() {
        let rest = &code[i..];
        if is_64 && rest.starts_with(&[0x48, 0xc7, 0xc7]) {
            // Sign-extended immediate.
            candidate = Some(VirtAddr(i64::from(imm32(i + 3)?) as u64));
            i += 7;
        } else if is_64 && rest.starts_with(&[0x48, 0x8d, 0x3d]) {
            let next = entry + (i + 7) as u64;
            candidate = Some(next.offset(i64::from(imm32(i + 3)?)));
            i += 7;
        } else if !is_64 && rest[0] == 0x68 {
            candidate = Some(VirtAddr(u64::from(imm32(i + 1)? as u32)));
            i += 5;
        } else if rest[0] == 0xe8 || rest.starts_with(&[0xff, 0x15]) {
            break;
        } else {
            i += 1;
        }
    }
    candidate.filter(|addr| !addr.is_null())
}

/// Conventional name of a program header type.
pub fn segment_type_name(p_type: u32) -> Option<&'static str> {
    use object::elf::*;
    Some(match p_type {
        PT_NULL => "NULL",
        PT_LOAD => "LOAD",
        PT_DYNAMIC => "DYNAMIC",
        PT_INTERP => "INTERP",
        PT_NOTE => "NOTE",
        PT_SHLIB => "SHLIB",
        PT_PHDR => "PHDR",
        PT_TLS => "TLS",
        PT_GNU_EH_FRAME => "GNU_EH_FRAME",
        PT_GNU_STACK => "GNU_STACK",
        PT_GNU_RELRO => "GNU_RELRO",
        PT_GNU_PROPERTY => "GNU_PROPERTY",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_from_absolute_mov() {
        // xor %ebp,%ebp; mov $0x401136,%rdi; call *0x2fe2(%rip)
        let code = [
            0x31, 0xed, 0x48, 0xc7, 0xc7, 0x36, 0x11, 0x40, 0x00, 0xff, 0x15, 0xe2, 0x2f, 0x00,
            0x00,
        ];
        assert_eq!(
            find_main_argument(&code, VirtAddr(0x401040), true),
            Some(VirtAddr(0x401136))
        );
    }

    #[test]
    fn main_from_rip_relative_lea() {
        // xor %r8d,%r8d; lea 0xca(%rip),%rdi; call *...(%rip)
        let code = [
            0x45, 0x31, 0xc0, 0x48, 0x8d, 0x3d, 0xca, 0x00, 0x00, 0x00, 0xff, 0x15, 0, 0, 0, 0,
        ];
        let entry = VirtAddr(0x1060);
        // lea ends at entry + 10.
        assert_eq!(
            find_main_argument(&code, entry, true),
            Some(VirtAddr(0x1060 + 10 + 0xca))
        );
    }

    #[test]
    fn main_from_32bit_push() {
        // push $0x80483e4; call __libc_start_main
        let code = [0x68, 0xe4, 0x83, 0x04, 0x08, 0xe8, 0, 0, 0, 0];
        assert_eq!(
            find_main_argument(&code, VirtAddr(0x8048300), false),
            Some(VirtAddr(0x80483e4))
        );
    }

    #[test]
    fn last_load_before_call_wins() {
        let code = [
            0x48, 0xc7, 0xc7, 0x10, 0x00, 0x00, 0x00, // mov $0x10,%rdi
            0x48, 0xc7, 0xc7, 0x20, 0x00, 0x00, 0x00, // mov $0x20,%rdi
            0xe8, 0, 0, 0, 0, // call
            0x48, 0xc7, 0xc7, 0x30, 0x00, 0x00, 0x00, // after the call: ignored
        ];
        assert_eq!(
            find_main_argument(&code, VirtAddr(0x1000), true),
            Some(VirtAddr(0x20))
        );
    }

    #[test]
    fn unrecognised_startup_yields_nothing() {
        assert_eq!(find_main_argument(&[0x90; 16], VirtAddr(0x1000), true), None);
        assert_eq!(find_main_argument(&[0xe8, 0, 0, 0, 0], VirtAddr(0x1000), true), None);
        // Truncated immediate.
        assert_eq!(find_main_argument(&[0x48, 0xc7, 0xc7, 0x01], VirtAddr(0x1000), true), None);
    }

    #[test]
    fn segment_names() {
        assert_eq!(segment_type_name(PT_LOAD), Some("LOAD"));
        assert_eq!(segment_type_name(PT_DYNAMIC), Some("DYNAMIC"));
        assert_eq!(segment_type_name(0x1234_5678), None);
    }

    fn mapping() -> Region {
        Region {
            start: VirtAddr(0x40_0000),
            end: VirtAddr(0x40_1000),
            perms: Default::default(),
            offset: 0,
            pathname: "/bin/demo".into(),
        }
    }

    #[test]
    fn class_byte_checked_before_parsing() {
        let mut ident = ELFMAG.to_vec();
        ident.push(ELFCLASS64);
        let err = Elf32Image::validate_header(&mapping(), &ident).unwrap_err();
        assert!(
            matches!(&err, TdbError::MalformedImage(msg) if msg.contains("word class 2")),
            "{err}"
        );

        let err = Elf64Image::validate_header(&mapping(), &ELFMAG).unwrap_err();
        assert!(
            matches!(&err, TdbError::MalformedImage(msg) if msg.contains("truncated")),
            "{err}"
        );
    }
}
