//! Dry-run output: the would-be payload of each record, as pretty JSON.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::mapper::NormalizedItem;
use crate::record::SourceRecord;

pub struct DryRunWriter {
    out: Box<dyn Write + Send>,
    items: usize,
}

impl DryRunWriter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out, items: 0 }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(Box::new(BufWriter::new(File::create(path)?))))
    }

    pub fn write_collections(&mut self, names: &[String]) -> io::Result<()> {
        writeln!(self.out, "COLLECTIONS: {}", serde_json::to_string(names)?)?;
        Ok(())
    }

    /// Every enumerated field of the source record, for inspection.
    pub fn write_record(&mut self, record: &SourceRecord) -> io::Result<()> {
        writeln!(self.out, "RECORD {}:", record.id)?;
        writeln!(self.out, "{}", serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    pub fn write_item(&mut self, item: &NormalizedItem) -> io::Result<()> {
        let mut payload = serde_json::Map::new();
        payload.insert("key".into(), item.key.clone().into());
        payload.insert("itemType".into(), item.item_type.clone().into());
        for (name, value) in &item.fields {
            payload.insert(name.clone(), value.clone());
        }
        payload.insert("creators".into(), serde_json::to_value(&item.creators)?);
        payload.insert("tags".into(), serde_json::to_value(&item.tags)?);
        payload.insert("collections".into(), serde_json::to_value(&item.collections)?);

        writeln!(self.out, "ITEM {} ({}):", item.source_id, item.key)?;
        writeln!(self.out, "{}", serde_json::to_string_pretty(&payload)?)?;
        if !item.notes.is_empty() {
            writeln!(self.out, "NOTES:")?;
            writeln!(self.out, "{}", serde_json::to_string_pretty(&item.notes)?)?;
        }
        if !item.attachments.is_empty() {
            writeln!(self.out, "ATTACHMENTS:")?;
            writeln!(self.out, "{}", serde_json::to_string_pretty(&item.attachments)?)?;
        }
        self.items += 1;
        Ok(())
    }

    pub fn items(&self) -> usize {
        self.items
    }

    pub fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
