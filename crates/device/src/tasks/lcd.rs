//! LCD task: owns the display, applies queued updates, and works around
//! the controller quirk where the first data byte after a DDRAM address
//! set is dropped — prime with a space, reposition, then write the line.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::hardware::lcd::RgbLcd;
use crate::models::{pad_line, LcdUpdate};

/// Controller settle time after clear/home.
const CLEAR_SETTLE: Duration = Duration::from_millis(2);
/// Settle time after cursor addressing.
const ADDRESS_SETTLE: Duration = Duration::from_millis(1);

pub struct LcdDeps {
    pub lcd_rx: mpsc::Receiver<LcdUpdate>,
    pub lcd: Box<dyn RgbLcd>,
    pub device_id: String,
}

/// Write one full line at `row` with the two-write priming fix. `text`
/// must already be exactly the display width; stale characters cannot
/// survive because every column is rewritten.
async fn write_line(lcd: &mut dyn RgbLcd, row: u8, text: &str) {
    if let Err(e) = lcd.set_cursor(0, row) {
        warn!(row, "set_cursor failed: {e:#}");
        return;
    }
    tokio::time::sleep(ADDRESS_SETTLE).await;
    // Some backpacks drop the first data byte after a DDRAM set; sacrifice
    // a space, then reposition so the real first character shows.
    let _ = lcd.write_char(' ');
    tokio::time::sleep(ADDRESS_SETTLE).await;
    if let Err(e) = lcd.set_cursor(0, row) {
        warn!(row, "set_cursor failed: {e:#}");
        return;
    }
    tokio::time::sleep(ADDRESS_SETTLE).await;
    if let Err(e) = lcd.write_str(text) {
        warn!(row, "write_str failed: {e:#}");
    }
}

async fn apply(lcd: &mut dyn RgbLcd, update: &LcdUpdate) {
    if let Some((r, g, b)) = update.backlight {
        if let Err(e) = lcd.set_backlight(r, g, b) {
            warn!("set_backlight failed: {e:#}");
        }
    }
    if update.clear_first {
        if let Err(e) = lcd.clear() {
            warn!("clear failed: {e:#}");
        }
        tokio::time::sleep(CLEAR_SETTLE).await;
    }
    write_line(lcd, 0, &update.line1).await;
    write_line(lcd, 1, &update.line2).await;
}

pub async fn run(mut deps: LcdDeps) {
    info!("lcd task started");
    let lcd = deps.lcd.as_mut();

    let mut ready = match lcd.init() {
        Ok(()) => true,
        Err(e) => {
            warn!("lcd init failed; will retry on next update: {e:#}");
            false
        }
    };

    if ready {
        // Boot banner until the first monitor update arrives.
        let _ = lcd.set_backlight(0, 255, 0);
        let _ = lcd.clear();
        tokio::time::sleep(CLEAR_SETTLE).await;
        write_line(lcd, 0, &pad_line("Plant Monitor")).await;
        write_line(lcd, 1, &pad_line(&deps.device_id)).await;
    }

    while let Some(update) = deps.lcd_rx.recv().await {
        if !ready {
            match lcd.init() {
                Ok(()) => {
                    info!("lcd init successful");
                    ready = true;
                }
                Err(e) => {
                    warn!("lcd init retry failed; dropping update: {e:#}");
                    continue;
                }
            }
        }
        apply(lcd, &update).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::lcd::MockLcd;
    use anyhow::Result;
    use std::sync::{Arc, Mutex};

    /// Display handle the test can inspect while the task owns a clone.
    #[derive(Clone)]
    struct SharedLcd(Arc<Mutex<MockLcd>>);

    impl RgbLcd for SharedLcd {
        fn init(&mut self) -> Result<()> {
            self.0.lock().unwrap().init()
        }
        fn clear(&mut self) -> Result<()> {
            self.0.lock().unwrap().clear()
        }
        fn set_cursor(&mut self, col: u8, row: u8) -> Result<()> {
            self.0.lock().unwrap().set_cursor(col, row)
        }
        fn write_char(&mut self, c: char) -> Result<()> {
            self.0.lock().unwrap().write_char(c)
        }
        fn write_str(&mut self, s: &str) -> Result<()> {
            self.0.lock().unwrap().write_str(s)
        }
        fn set_backlight(&mut self, r: u8, g: u8, b: u8) -> Result<()> {
            self.0.lock().unwrap().set_backlight(r, g, b)
        }
    }

    fn spawn_lcd() -> (mpsc::Sender<LcdUpdate>, Arc<Mutex<MockLcd>>) {
        let (tx, rx) = mpsc::channel(8);
        let inner = Arc::new(Mutex::new(MockLcd::new()));
        let deps = LcdDeps {
            lcd_rx: rx,
            lcd: Box::new(SharedLcd(Arc::clone(&inner))),
            device_id: "plant-0".to_string(),
        };
        tokio::spawn(run(deps));
        (tx, inner)
    }

    #[tokio::test(start_paused = true)]
    async fn boot_banner_shows_product_and_device_id() {
        let (_tx, lcd) = spawn_lcd();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let inner = lcd.lock().unwrap();
        assert_eq!(inner.row(0), "Plant Monitor   ");
        assert_eq!(inner.row(1), "plant-0         ");
        assert!(inner.inited);
    }

    #[tokio::test(start_paused = true)]
    async fn update_writes_both_lines_and_backlight() {
        let (tx, lcd) = spawn_lcd();
        tx.send(LcdUpdate::new(
            "T:21.5C M:48.0%",
            "OK",
            Some((0, 255, 0)),
            false,
        ))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let inner = lcd.lock().unwrap();
        assert_eq!(inner.row(0), "T:21.5C M:48.0% ");
        assert_eq!(inner.row(1), "OK              ");
        assert_eq!(inner.backlight, (0, 255, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_line_erases_stale_characters() {
        let (tx, lcd) = spawn_lcd();
        tx.send(LcdUpdate::new("AAAAAAAAAAAAAAAA", "BBBBBBBBBBBBBBBB", None, false))
            .await
            .unwrap();
        tx.send(LcdUpdate::new("OK", "", None, false)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let inner = lcd.lock().unwrap();
        assert_eq!(inner.row(0), "OK              ");
        assert_eq!(inner.row(1), " ".repeat(16));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_first_blanks_before_writing() {
        let (tx, lcd) = spawn_lcd();
        tx.send(LcdUpdate::new("XXXXXXXXXXXXXXXX", "YYYYYYYYYYYYYYYY", None, false))
            .await
            .unwrap();
        tx.send(LcdUpdate::new("fresh", "", None, true)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let inner = lcd.lock().unwrap();
        // Boot banner clear + this one.
        assert!(inner.clears >= 2);
        assert_eq!(inner.row(0), "fresh           ");
    }

    /// Display that refuses to init a configurable number of times.
    struct FlakyLcd {
        inner: SharedLcd,
        refusals: Arc<Mutex<u32>>,
    }

    impl RgbLcd for FlakyLcd {
        fn init(&mut self) -> Result<()> {
            let mut refusals = self.refusals.lock().unwrap();
            if *refusals > 0 {
                *refusals -= 1;
                anyhow::bail!("bus not ready");
            }
            drop(refusals);
            self.inner.init()
        }
        fn clear(&mut self) -> Result<()> {
            self.inner.clear()
        }
        fn set_cursor(&mut self, col: u8, row: u8) -> Result<()> {
            self.inner.set_cursor(col, row)
        }
        fn write_char(&mut self, c: char) -> Result<()> {
            self.inner.write_char(c)
        }
        fn write_str(&mut self, s: &str) -> Result<()> {
            self.inner.write_str(s)
        }
        fn set_backlight(&mut self, r: u8, g: u8, b: u8) -> Result<()> {
            self.inner.set_backlight(r, g, b)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn init_failure_recovers_on_a_later_update() {
        let (tx, rx) = mpsc::channel(8);
        let inner = Arc::new(Mutex::new(MockLcd::new()));
        let deps = LcdDeps {
            lcd_rx: rx,
            lcd: Box::new(FlakyLcd {
                inner: SharedLcd(Arc::clone(&inner)),
                refusals: Arc::new(Mutex::new(2)), // startup + first update fail
            }),
            device_id: "plant-0".to_string(),
        };
        tokio::spawn(run(deps));

        // First update hits the second refusal and is dropped.
        tx.send(LcdUpdate::new("dropped", "", None, false)).await.unwrap();
        // Second update re-inits successfully and renders.
        tx.send(LcdUpdate::new("shown", "", None, false)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(inner.lock().unwrap().row(0), "shown           ");
    }
}
