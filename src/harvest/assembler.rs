//! Ordered slot storage for harvested pages.

use tracing::warn;

/// Fixed-size array of page slots. Page `n` lives at index `n - 1`.
///
/// Each slot is expected to be written once per harvest. A second write to the
/// same slot replaces its contents and leaves every other slot untouched.
#[derive(Debug)]
pub struct ResultAssembler<T> {
    slots: Vec<Option<Vec<T>>>,
    filled: usize,
}

impl<T> ResultAssembler<T> {
    pub fn new(total_pages: u32) -> Self {
        let mut slots = Vec::with_capacity(total_pages as usize);
        slots.resize_with(total_pages as usize, || None);
        Self { slots, filled: 0 }
    }

    pub fn total_pages(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of non-empty slots.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Stores `items` in the slot of `page`.
    ///
    /// Returns `false` when `page` is outside `1..=total_pages`; nothing is
    /// written in that case.
    pub fn write(&mut self, page: u32, items: Vec<T>) -> bool {
        let Some(slot) = page
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index as usize))
        else {
            warn!(page, total_pages = self.slots.len(), "Page outside slot range");
            return false;
        };

        if slot.replace(items).is_some() {
            warn!(page, "Slot written twice; keeping the latest items");
        } else {
            self.filled += 1;
        }
        true
    }

    pub fn is_filled(&self, page: u32) -> bool {
        page.checked_sub(1)
            .and_then(|index| self.slots.get(index as usize))
            .is_some_and(Option::is_some)
    }

    /// Pages in `pages` whose slot is still empty, in ascending order.
    pub fn missing<I>(&self, pages: I) -> Vec<u32>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut missing: Vec<u32> = pages
            .into_iter()
            .filter(|page| !self.is_filled(*page))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }

    /// Concatenates all filled slots in ascending page order.
    pub fn flatten(self) -> Vec<T> {
        self.slots.into_iter().flatten().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_orders_by_page() {
        let mut assembler = ResultAssembler::new(3);
        assert!(assembler.write(3, vec!["e", "f"]));
        assert!(assembler.write(1, vec!["a", "b"]));
        assert!(assembler.write(2, vec!["c", "d"]));

        assert_eq!(assembler.filled(), 3);
        assert_eq!(assembler.flatten(), vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_flatten_skips_empty_slots() {
        let mut assembler = ResultAssembler::new(4);
        assembler.write(1, vec![1]);
        assembler.write(4, vec![4, 5]);

        assert_eq!(assembler.missing(1..=4), vec![2, 3]);
        assert_eq!(assembler.flatten(), vec![1, 4, 5]);
    }

    #[test]
    fn test_rewrite_keeps_other_slots() {
        let mut assembler = ResultAssembler::new(2);
        assembler.write(1, vec![1]);
        assembler.write(2, vec![2]);
        assembler.write(2, vec![20]);

        assert_eq!(assembler.filled(), 2);
        assert_eq!(assembler.flatten(), vec![1, 20]);
    }

    #[test]
    fn test_out_of_range_write_is_rejected() {
        let mut assembler = ResultAssembler::new(2);
        assert!(!assembler.write(0, vec![0]));
        assert!(!assembler.write(3, vec![3]));
        assert_eq!(assembler.filled(), 0);
        assert!(assembler.flatten().is_empty());
    }

    #[test]
    fn test_empty_page_counts_as_filled() {
        let mut assembler: ResultAssembler<u8> = ResultAssembler::new(2);
        assembler.write(2, Vec::new());
        assert!(assembler.is_filled(2));
        assert_eq!(assembler.missing([2, 1]), vec![1]);
    }
}
