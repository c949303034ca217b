use core::ptr;

use crate::memory;

mod imp;

unsafe extern "C" {
    #[link_name = "__basalt_boot_stack_top"]
    static mut BOOT_STACK_TOP: u8;
}

unsafe fn init_bss() {
    let bss = memory::layout::bss_range();
    unsafe {
        ptr::write_bytes(
            ptr::with_exposed_provenance_mut::<u8>(bss.start),
            0,
            bss.end - bss.start,
        );
    }
}

unsafe extern "C" fn boot_cpu_start(dtb_pa: usize) -> ! {
    unsafe {
        init_bss();
    }
    crate::kernel_main(dtb_pa)
}
