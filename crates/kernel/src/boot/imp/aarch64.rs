use core::arch::naked_asm;

use super::super::{BOOT_STACK_TOP, boot_cpu_start};

// The AArch64 Linux boot protocol leaves the physical address of the
// device tree blob in `x0`; it stays there untouched all the way into
// `boot_cpu_start`.
//
// https://www.kernel.org/doc/Documentation/arm64/booting.txt
#[unsafe(naked)]
#[unsafe(link_section = ".text.entry")]
#[unsafe(export_name = "entry")]
unsafe extern "C" fn entry(dtb_pa: usize) {
    naked_asm!(
        "adrp x1, {stack_top}",
        "add x1, x1, :lo12:{stack_top}",
        "mov sp, x1",
        "b {start}",
        stack_top = sym BOOT_STACK_TOP,
        start = sym boot_cpu_start,
    );
}
