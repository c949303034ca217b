//! The Basalt kernel bootstrap for AArch64.
//!
//! Firmware drops us at `entry` with the device tree blob's physical
//! address in `x0`. The boot path sets up a stack, clears BSS, brings up
//! the PL011 console, and then builds the allocator stack: device tree →
//! memory map → buddy zones → slab caches → size-class heap. Once that
//! stands, the kernel has a working `GlobalAlloc` and the bootstrap's job
//! is done.

#![cfg_attr(not(test), no_std)]

#[cfg(not(test))]
mod boot;
pub mod console;
pub mod log;
pub mod memory;
mod spinlock;

pub use memory::{
    heap::{allocate, free, reallocate},
    phys::{PhysBox, allocate_physical, available_physical, total_physical},
};

#[cfg(not(test))]
fn kernel_main(dtb_pa: usize) -> ! {
    use crate::log::{error, info};

    unsafe {
        console::init();
    }
    info!("basalt: booting, device tree at {dtb_pa:#x}");

    if let Err(err) = unsafe { memory::init(dtb_pa) } {
        error!("memory bootstrap failed: {err}");
        panic!("cannot continue without a physical allocator");
    }

    info!(
        "physical memory: {} KiB total, {} KiB available",
        memory::phys::total_physical() / 1024,
        memory::phys::available_physical() / 1024,
    );

    loop {
        core::hint::spin_loop();
    }
}
