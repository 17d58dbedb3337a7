use std::collections::VecDeque;

use log::{info, warn};

/// Width of every printed page in pixels.
pub const PRINTER_WIDTH: usize = 160;

/// One finished page from the virtual printer, `PRINTER_WIDTH` ARGB pixels per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintedPage {
    pub pixels: Vec<u32>,
    pub height: usize,
}

impl PrintedPage {
    pub fn row(&self, y: usize) -> Option<&[u32]> {
        let start = y.checked_mul(PRINTER_WIDTH)?;
        self.pixels.get(start..start + PRINTER_WIDTH)
    }
}

#[derive(Debug, Default)]
pub struct PrinterFeed {
    connected: bool,
    pages: VecDeque<PrintedPage>,
}

impl PrinterFeed {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        if connected != self.connected {
            info!(
                "Printer {}",
                if connected { "connected" } else { "disconnected" }
            );
        }
        self.connected = connected;
    }

    /// Queues a page from the engine. Partial trailing rows are dropped.
    pub fn push(&mut self, pixels: &[u32], height: usize) {
        let rows = height.min(pixels.len() / PRINTER_WIDTH);
        if rows != height {
            warn!(
                "Printed page claims {height} rows but only carries {rows}; keeping {rows}"
            );
        }
        if rows == 0 {
            return;
        }
        self.pages.push_back(PrintedPage {
            pixels: pixels[..rows * PRINTER_WIDTH].to_vec(),
            height: rows,
        });
    }

    pub fn pop(&mut self) -> Option<PrintedPage> {
        self.pages.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.pages.len()
    }
}
