//! Debug Utilities
//!
//! Helpers used when reporting a broken heap.

/// Format an address the way every heap diagnostic prints it
pub fn format_address(address: usize) -> String {
    format!("0x{:016X}", address)
}

/// Render `lines` rows of 16 bytes starting at `start` as a hex dump
///
/// # Safety
/// `start..start + size` must be readable memory.
pub unsafe fn dump_region(start: usize, size: usize, lines: usize) -> String {
    let mut out = format!("Memory dump at {}:\n", format_address(start));

    for i in 0..lines {
        let offset = i * 16;
        if offset >= size {
            break;
        }

        let addr = start + offset;
        out.push_str(&format!("  {}: ", format_address(addr)));

        for j in 0..16 {
            if offset + j >= size {
                break;
            }

            let byte = *((addr + j) as *const u8);
            out.push_str(&format!("{:02X} ", byte));
        }

        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_region_formats_bytes() {
        let bytes: [u8; 20] = [0xAB; 20];
        let dump = unsafe { dump_region(bytes.as_ptr() as usize, bytes.len(), 4) };
        assert_eq!(dump.lines().count(), 3);
        assert!(dump.contains("AB AB AB"));
    }
}
