//! UDP port allocation for stream ingest sockets

use chakra_core::{Error, Result};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Issues ports from a bounded range, reusing the lowest released port first.
///
/// Every port in `[start, end]` is in exactly one of three states: never issued
/// (above the high-watermark), free (in `free`), or in use. Callers serialize
/// access; the registry keeps the allocator behind its own mutex.
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    /// Highest port ever issued, `None` before the first allocation
    high_watermark: Option<u16>,
    free: BTreeSet<u16>,
}

impl PortAllocator {
    /// Create an allocator over the inclusive range `[start, end]`.
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInput(format!(
                "port range start {start} exceeds end {end}"
            )));
        }
        Ok(Self {
            start,
            end,
            high_watermark: None,
            free: BTreeSet::new(),
        })
    }

    pub fn allocate(&mut self) -> Result<u16> {
        if let Some(port) = self.free.pop_first() {
            debug!(port, "Reusing released port");
            return Ok(port);
        }

        let next = match self.high_watermark {
            None => self.start,
            Some(hw) if hw < self.end => hw + 1,
            Some(_) => {
                return Err(Error::ResourceExhausted(format!(
                    "no free ports in range {}-{}",
                    self.start, self.end
                )))
            }
        };

        self.high_watermark = Some(next);
        Ok(next)
    }

    /// Return a port to the free set.
    ///
    /// Releasing a port that is not in use logs a warning and is otherwise ignored.
    /// Returns whether the port was actually released.
    pub fn release(&mut self, port: u16) -> bool {
        if !self.is_in_use(port) {
            warn!(port, "Ignoring release of port that is not in use");
            return false;
        }
        self.free.insert(port);
        true
    }

    #[must_use]
    pub fn is_in_use(&self, port: u16) -> bool {
        let issued = self.high_watermark.is_some_and(|hw| port >= self.start && port <= hw);
        issued && !self.free.contains(&port)
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        let issued = self
            .high_watermark
            .map_or(0, |hw| usize::from(hw - self.start) + 1);
        issued - self.free.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_in_order() {
        let mut ports = PortAllocator::new(5000, 5002).unwrap();
        assert_eq!(ports.allocate().unwrap(), 5000);
        assert_eq!(ports.allocate().unwrap(), 5001);
        assert_eq!(ports.allocate().unwrap(), 5002);
        assert!(matches!(ports.allocate(), Err(Error::ResourceExhausted(_))));
        assert_eq!(ports.in_use(), 3);
    }

    #[test]
    fn test_released_port_reused_before_range_advances() {
        let mut ports = PortAllocator::new(5000, 5010).unwrap();
        for _ in 0..4 {
            ports.allocate().unwrap();
        }
        assert!(ports.release(5002));
        assert!(ports.release(5001));

        // Lowest released first, then the next released, then fresh range
        assert_eq!(ports.allocate().unwrap(), 5001);
        assert_eq!(ports.allocate().unwrap(), 5002);
        assert_eq!(ports.allocate().unwrap(), 5004);
    }

    #[test]
    fn test_release_of_unused_port_is_ignored() {
        let mut ports = PortAllocator::new(5000, 5001).unwrap();
        assert!(!ports.release(5000));
        assert!(!ports.release(4000));

        let port = ports.allocate().unwrap();
        assert!(ports.release(port));
        assert!(!ports.release(port));
        assert_eq!(ports.in_use(), 0);
    }

    #[test]
    fn test_single_port_range() {
        let mut ports = PortAllocator::new(6000, 6000).unwrap();
        assert_eq!(ports.capacity(), 1);
        assert_eq!(ports.allocate().unwrap(), 6000);
        assert!(ports.allocate().is_err());
        ports.release(6000);
        assert_eq!(ports.allocate().unwrap(), 6000);
    }

    #[test]
    fn test_top_of_u16_range() {
        let mut ports = PortAllocator::new(65534, 65535).unwrap();
        assert_eq!(ports.allocate().unwrap(), 65534);
        assert_eq!(ports.allocate().unwrap(), 65535);
        assert!(ports.allocate().is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(matches!(
            PortAllocator::new(10, 9),
            Err(Error::InvalidInput(_))
        ));
    }
}
