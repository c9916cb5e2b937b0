//! Code Patcher (§4.E).
//!
//! Encodes the two trampoline forms x86-64 needs to redirect a function's
//! entry point, and flips `mprotect` W^X permissions around the byte copy.
//! A protect failure mid-install is unrecoverable — the instruction stream
//! may already be half-written — so the patcher aborts the process rather
//! than returning an error (§7: `ProtectFailed` is fatal).

use std::slice;

/// Length, in bytes, of the direct trampoline (`push`+`mov`+`ret`).
pub const DIRECT_LEN: usize = 13;
/// Length, in bytes, of the indirect trampoline (`movabs`+`jmp`).
pub const INDIRECT_LEN: usize = 12;

/// One installed hijack's captured state (§3: Guard).
///
/// `original` is read before the first protect flip, so it holds the
/// pristine prologue bytes; `patched` is exactly what was written. Both
/// `unpatch` and `restore` are idempotent: they always (re)write the full
/// `N`-byte span regardless of what currently sits at `from`.
#[derive(Debug, Clone)]
pub struct Guard {
    /// Target entry address the trampoline was written over.
    pub from: u64,
    /// Trampoline's encoded destination (a code address for `Direct`, or
    /// the address of a word holding one for `Indirect`).
    pub to: u64,
    /// Bytes that were at `from` before installation.
    pub original: Vec<u8>,
    /// Bytes that were written at `from` on installation.
    pub patched: Vec<u8>,
}

impl Guard {
    /// Write `original` back over `from` (§4.E `unpatch`).
    pub fn unpatch(&self) {
        copy_to_location(self.from, &self.original);
    }

    /// Re-write `patched` over `from` (§4.E `restore`).
    pub fn restore(&self) {
        copy_to_location(self.from, &self.patched);
    }
}

/// Install a direct patch at `from`, jumping unconditionally to the code
/// address `to` (§4.E `patch_direct`).
///
/// Encoding: `push imm32_lo ; mov [rsp+4], imm32_hi ; ret` — materializes
/// the 64-bit target on the stack and returns into it.
pub fn patch_direct(from: u64, to: u64) -> Guard {
    let patched = encode_direct(to);
    install(from, patched.to_vec(), to)
}

/// Install an indirect patch at `from`. `to` is the address of a word that
/// itself holds the real destination code address — required when the
/// destination is a dynamically-built stub whose code pointer lives one
/// indirection away (§4.E `patch_indirect`).
///
/// Encoding: `movabs rdx, imm64 ; jmp qword ptr [rdx]`.
pub fn patch_indirect(from: u64, to: u64) -> Guard {
    let patched = encode_indirect(to);
    install(from, patched.to_vec(), to)
}

fn install(from: u64, patched: Vec<u8>, to: u64) -> Guard {
    let len = patched.len();
    let original = raw_read(from, len);
    copy_to_location(from, &patched);
    Guard {
        from,
        to,
        original,
        patched,
    }
}

fn encode_direct(to: u64) -> [u8; DIRECT_LEN] {
    [
        0x68, // push imm32
        to as u8,
        (to >> 8) as u8,
        (to >> 16) as u8,
        (to >> 24) as u8,
        0xc7, 0x44, 0x24, 0x04, // mov dword ptr [rsp+4], imm32
        (to >> 32) as u8,
        (to >> 40) as u8,
        (to >> 48) as u8,
        (to >> 56) as u8,
        0xc3, // ret
    ]
}

fn encode_indirect(to: u64) -> [u8; INDIRECT_LEN] {
    [
        0x48, 0xba, // movabs rdx, imm64
        to as u8,
        (to >> 8) as u8,
        (to >> 16) as u8,
        (to >> 24) as u8,
        (to >> 32) as u8,
        (to >> 40) as u8,
        (to >> 48) as u8,
        (to >> 56) as u8,
        0xff, 0x22, // jmp qword ptr [rdx]
    ]
}

/// # Safety
/// Caller must ensure `[addr, addr+len)` is mapped and that aliasing this
/// region as a byte slice for the duration of the call does not race an
/// in-flight read by the thread currently executing the patched function
/// (the spec accepts this race on the first instruction — §5).
unsafe fn raw_slice(addr: u64, len: usize) -> &'static mut [u8] {
    slice::from_raw_parts_mut(addr as *mut u8, len)
}

fn raw_read(addr: u64, len: usize) -> Vec<u8> {
    unsafe { raw_slice(addr, len).to_vec() }
}

fn copy_to_location(addr: u64, data: &[u8]) {
    mprotect_cross_page(addr, data.len(), libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC);
    unsafe {
        raw_slice(addr, data.len()).copy_from_slice(data);
    }
    mprotect_cross_page(addr, data.len(), libc::PROT_READ | libc::PROT_EXEC);
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn page_start(addr: u64, page_size: usize) -> u64 {
    addr & !((page_size as u64) - 1)
}

fn mprotect_cross_page(addr: u64, len: usize, prot: i32) {
    let page_size = page_size();
    let mut page = page_start(addr, page_size);
    let end = addr + len as u64;
    while page < end {
        let rc = unsafe { libc::mprotect(page as *mut libc::c_void, page_size, prot) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            tracing::error!(address = page, %err, "mprotect failed mid-install, aborting process");
            std::process::abort();
        }
        page += page_size as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_direct_places_absolute_address() {
        let code = encode_direct(0x1122_3344_5566_7788);
        assert_eq!(code[0], 0x68);
        assert_eq!(code[1..5], [0x88, 0x77, 0x66, 0x55]);
        assert_eq!(code[9..13], [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(code.last(), Some(&0xc3));
    }

    #[test]
    fn encode_indirect_places_absolute_address() {
        let code = encode_indirect(0xdead_beef_cafe_0001);
        assert_eq!(&code[0..2], &[0x48, 0xba]);
        assert_eq!(code[2..10], [0x01, 0x00, 0xfe, 0xca, 0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(&code[10..12], &[0xff, 0x22]);
    }

    /// A single anonymous page the test owns outright, so flipping its
    /// protection to `RWX` and back cannot disturb unrelated allocations
    /// the way patching a slice of the heap would.
    struct ScratchPage {
        addr: *mut libc::c_void,
        len: usize,
    }

    impl ScratchPage {
        fn new() -> Self {
            let len = page_size();
            let addr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            assert_ne!(addr, libc::MAP_FAILED, "mmap scratch page failed");
            Self { addr, len }
        }

        fn as_slice(&self) -> &[u8] {
            unsafe { slice::from_raw_parts(self.addr as *const u8, self.len) }
        }
    }

    impl Drop for ScratchPage {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.addr, self.len);
            }
        }
    }

    #[test]
    fn round_trip_patch_unpatch_restore() {
        let page = ScratchPage::new();
        let from = page.addr as u64;

        let guard = patch_direct(from, 0x4242_4242_4242_4242);
        assert_eq!(page.as_slice()[0], 0x68);

        guard.unpatch();
        assert_eq!(&page.as_slice()[..DIRECT_LEN], &[0u8; DIRECT_LEN][..]);

        guard.restore();
        assert_eq!(page.as_slice()[0], 0x68);
    }

    #[test]
    fn page_start_is_aligned() {
        let ps = page_size();
        let addr = (ps as u64) * 3 + 17;
        assert_eq!(page_start(addr, ps), (ps as u64) * 3);
    }
}
