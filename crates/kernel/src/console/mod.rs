use core::{
    fmt::{self, Write as _},
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

use self::pl011::Pl011;
use crate::spinlock::SpinMutex;

mod pl011;

// QEMU's virt machine: PL011 at 0x0900_0000, 24 MHz APB clock.
const UART_BASE: usize = 0x0900_0000;
const UART_CLOCK: u32 = 24_000_000;

static CONSOLE: SpinMutex<Option<Pl011>> = SpinMutex::new(None);
static PANICKED: AtomicBool = AtomicBool::new(false);

trait Console {
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// Brings up the UART and attaches it to `print!`/`println!`.
///
/// # Safety
///
/// Must only be called once, on the boot path, with the UART MMIO region
/// accessible.
pub unsafe fn init() {
    let uart = unsafe { Pl011::new(UART_BASE, UART_CLOCK) };
    *CONSOLE.lock() = Some(uart);
}

struct Writer<'a>(&'a mut dyn Console);

impl fmt::Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }
}

pub fn print(args: fmt::Arguments) {
    if PANICKED.load(Ordering::Acquire) {
        loop {
            // The panic report owns the console now.
            hint::spin_loop();
        }
    }
    let mut console = CONSOLE.lock();
    if let Some(console) = console.as_mut() {
        let _ = Writer(console).write_fmt(args);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*))
    };
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    PANICKED.store(true, Ordering::Release);

    let mut console = CONSOLE.lock();
    if let Some(console) = console.as_mut() {
        let mut writer = Writer(console);
        let _ = writeln!(writer);
        let _ = writeln!(writer, "!!! KERNEL PANIC !!!");
        let _ = writeln!(writer);
        if let Some(location) = info.location() {
            let _ = writeln!(writer, "Location: {location}");
        }
        let _ = writeln!(writer, "Message:  {}", info.message());
    }
    loop {
        hint::spin_loop();
    }
}
