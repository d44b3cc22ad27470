use crate::types::VariantArray;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct RowData {
    lsn: i64,
    tuple: Vec<u8>,
    columns: Box<[VariantArray]>,
}

/// Refcounted row buffer: LSN header, CJSON tuple, typed columns for the
/// indexed fields. Column `i` corresponds to payload field `i`; slot 0 is
/// kept empty because the tuple bytes live separately.
///
/// Cloning shares the buffer. Mutators go through `Arc::make_mut`, so a
/// writer reusing a row slot never tears data out from under a reader that
/// pinned the old value in a query result.
#[derive(Debug, Clone, Default)]
pub struct PayloadValue {
    data: Arc<RowData>,
}

impl PayloadValue {
    pub fn new(num_fields: usize, tuple: Vec<u8>) -> Self {
        let columns = vec![VariantArray::new(); num_fields].into_boxed_slice();
        Self { data: Arc::new(RowData { lsn: -1, tuple, columns }) }
    }

    pub fn lsn(&self) -> i64 {
        self.data.lsn
    }

    pub fn set_lsn(&mut self, lsn: i64) {
        Arc::make_mut(&mut self.data).lsn = lsn;
    }

    /// CJSON bytes of the document body.
    pub fn tuple(&self) -> &[u8] {
        &self.data.tuple
    }

    pub fn set_tuple(&mut self, tuple: Vec<u8>) {
        Arc::make_mut(&mut self.data).tuple = tuple;
    }

    pub fn num_fields(&self) -> usize {
        self.data.columns.len()
    }

    pub fn field(&self, idx: usize) -> &VariantArray {
        &self.data.columns[idx]
    }

    pub fn set_field(&mut self, idx: usize, values: VariantArray) {
        Arc::make_mut(&mut self.data).columns[idx] = values;
    }

    /// Grows the column set after a field was appended to the payload type.
    pub fn resize_fields(&mut self, num_fields: usize) {
        let data = Arc::make_mut(&mut self.data);
        let mut columns = std::mem::take(&mut data.columns).into_vec();
        columns.resize(num_fields, VariantArray::new());
        data.columns = columns.into_boxed_slice();
    }

    /// Removes one column after a field drop, shifting later columns down.
    pub fn remove_field(&mut self, idx: usize) {
        let data = Arc::make_mut(&mut self.data);
        let mut columns = std::mem::take(&mut data.columns).into_vec();
        columns.remove(idx);
        data.columns = columns.into_boxed_slice();
    }

    /// Number of live handles, including this one.
    pub fn refs(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Rough heap footprint for memory stats.
    pub fn heap_size(&self) -> usize {
        let mut size = self.data.tuple.len();
        for col in self.data.columns.iter() {
            size += col.len() * std::mem::size_of::<crate::types::Variant>();
            for v in col.iter() {
                if let crate::types::Variant::String(s) = v {
                    size += s.heap_size();
                }
            }
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variant;
    use smallvec::smallvec;

    #[test]
    fn mutation_does_not_disturb_shared_readers() {
        let mut writer = PayloadValue::new(2, vec![1, 2, 3]);
        writer.set_field(1, smallvec![Variant::Int(5)]);
        let reader = writer.clone();

        writer.set_field(1, smallvec![Variant::Int(9)]);
        writer.set_lsn(42);

        assert_eq!(reader.field(1)[0], Variant::Int(5));
        assert_eq!(reader.lsn(), -1);
        assert_eq!(writer.field(1)[0], Variant::Int(9));
        assert_eq!(writer.lsn(), 42);
    }

    #[test]
    fn resize_preserves_existing_columns() {
        let mut pv = PayloadValue::new(2, Vec::new());
        pv.set_field(1, smallvec![Variant::from("x")]);
        pv.resize_fields(4);
        assert_eq!(pv.num_fields(), 4);
        assert_eq!(pv.field(1)[0].as_str(), Some("x"));
        assert!(pv.field(3).is_empty());
    }
}
