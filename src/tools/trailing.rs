use crate::error::Error;
use crate::models::Side;
use crate::Result;

/// Stop level that follows price in the position's favour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingStop {
    side: Side,
    current: f64,
    stop: f64,
    active: bool,
}

impl Default for TrailingStop {
    fn default() -> Self {
        Self::new()
    }
}

impl TrailingStop {
    pub fn new() -> Self {
        Self {
            side: Side::Buy,
            current: 0.0,
            stop: 0.0,
            active: false,
        }
    }

    /// Arm the stop; it must sit below price for a long and above it for a short
    pub fn start(&mut self, side: Side, current: f64, stop: f64) -> Result<()> {
        match side {
            Side::Buy if stop > current => {
                return Err(Error::InvalidStop(format!(
                    "stop {} above price {} in long position",
                    stop, current
                )))
            }
            Side::Sell if stop < current => {
                return Err(Error::InvalidStop(format!(
                    "stop {} below price {} in short position",
                    stop, current
                )))
            }
            _ => {}
        }

        self.side = side;
        self.current = current;
        self.stop = stop;
        self.active = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn level(&self) -> f64 {
        self.stop
    }

    /// Feed a new price; returns true when the stop was crossed
    pub fn update(&mut self, current: f64) -> bool {
        if !self.active {
            return false;
        }

        let favourable = match self.side {
            Side::Buy => current - self.current,
            Side::Sell => self.current - current,
        };
        self.current = current;

        if favourable > 0.0 {
            self.stop += self.side.sign() * favourable;
            return false;
        }

        match self.side {
            Side::Buy => current <= self.stop,
            Side::Sell => current >= self.stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_rejects_wrong_side() {
        let mut ts = TrailingStop::new();
        assert!(ts.start(Side::Buy, 21.5, 13.0).is_ok());
        assert!(matches!(ts.start(Side::Buy, 21.5, 22.0), Err(Error::InvalidStop(_))));
        assert!(ts.start(Side::Sell, 10.0, 13.0).is_ok());
        assert!(ts.start(Side::Sell, 21.5, 13.0).is_err());
    }

    #[test]
    fn test_start_and_stop() {
        let mut ts = TrailingStop::new();
        assert!(!ts.active());

        ts.start(Side::Buy, 21.5, 13.0).unwrap();
        assert!(ts.active());

        ts.stop();
        assert!(!ts.active());
        assert!(!ts.update(1.0));
    }

    #[test]
    fn test_update_long() {
        let mut ts = TrailingStop::new();
        assert!(!ts.update(12.0));

        ts.start(Side::Buy, 21.5, 13.0).unwrap();
        assert!(!ts.update(26.5));
        assert_eq!(ts.level(), 18.0);

        assert!(ts.update(18.0));
        assert!(ts.update(8.0));
    }

    #[test]
    fn test_update_short() {
        let mut ts = TrailingStop::new();
        ts.start(Side::Sell, 10.0, 13.0).unwrap();

        assert!(!ts.update(5.0));
        assert_eq!(ts.level(), 8.0);
        assert!(!ts.update(7.0));
        assert!(ts.update(8.0));
    }
}
