//! Memory access capability shared by process handles and binary image
//! queries.

use crate::errors::TdbResult;
use crate::types::VirtAddr;

/// Byte-level access to a tracee's address space.
///
/// A transfer that stops part-way fails with
/// [`TdbError::MemoryAccessFault`](crate::errors::TdbError::MemoryAccessFault)
/// carrying the number of bytes that did get through.
pub trait MemoryAccess {
    fn read_bytes(&self, addr: VirtAddr, buf: &mut [u8]) -> TdbResult<()>;

    fn write_bytes(&self, addr: VirtAddr, data: &[u8]) -> TdbResult<()>;

    fn read_vec(&self, addr: VirtAddr, len: usize) -> TdbResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf)
    }

    fn read_u32(&self, addr: VirtAddr) -> TdbResult<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, addr: VirtAddr) -> TdbResult<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a pointer of `width` bytes (4 or 8).
    fn read_pointer(&self, addr: VirtAddr, width: usize) -> TdbResult<VirtAddr> {
        if width == 4 {
            Ok(VirtAddr(u64::from(self.read_u32(addr)?)))
        } else {
            Ok(VirtAddr(self.read_u64(addr)?))
        }
    }
}
