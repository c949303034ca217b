use core::ops::Range;

use fdt::Fdt;
use palloc::Align as _;

unsafe extern "C" {
    #[link_name = "__basalt_kernel_start"]
    static mut KERNEL_START: u8;
    #[link_name = "__basalt_kernel_end"]
    static mut KERNEL_END: u8;
    #[link_name = "__basalt_bss_start"]
    static mut BSS_START: u8;
    #[link_name = "__basalt_bss_end"]
    static mut BSS_END: u8;
}

pub fn bss_range() -> Range<usize> {
    (&raw const BSS_START).addr()..(&raw const BSS_END).addr()
}

/// The loaded kernel image, expanded to page boundaries.
pub fn kernel_image_range() -> Range<usize> {
    let start = (&raw const KERNEL_START).addr();
    let end = (&raw const KERNEL_END).addr();
    expand_to_page_boundaries(start..end)
}

/// The device tree blob, expanded to page boundaries.
pub fn dtb_range(fdt: &Fdt<'_>) -> Range<usize> {
    let start = fdt.as_bytes().as_ptr().addr();
    expand_to_page_boundaries(start..start + fdt.size())
}

fn expand_to_page_boundaries(range: Range<usize>) -> Range<usize> {
    range.start.page_align_down()..range.end.page_align_up()
}
