use crate::model::ReviewRecord;

/// Records accumulated across items, written out as one unit once the
/// threshold is reached. Only cleared after a confirmed write.
#[derive(Debug)]
pub struct BatchBuffer {
    records: Vec<ReviewRecord>,
    threshold: usize,
}

impl BatchBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            records: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = ReviewRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[ReviewRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.threshold
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::review;

    #[test]
    fn test_full_at_threshold() {
        let mut buffer = BatchBuffer::new(2);
        buffer.extend([review("440", 1, 50)]);
        assert!(!buffer.is_full());
        buffer.extend([review("440", 2, 40)]);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_preserves_append_order() {
        let mut buffer = BatchBuffer::new(10);
        buffer.extend([review("440", 1, 50), review("440", 2, 40)]);
        buffer.extend([review("570", 3, 90)]);

        let ids: Vec<i64> = buffer.records().iter().map(|r| r.rec_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
