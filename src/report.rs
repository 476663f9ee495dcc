use crate::bitmap::FreeResource;
use crate::error::{Ext2Error, Result};
use crate::groupdescriptor::GroupSummary;
use crate::image::ReadAt;
use crate::superblock::SuperblockSummary;
use crate::Ext2Image;
use log::info;
use serde_json::{json, Value};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SUPERBLOCK_CSV: &str = "super.csv";
pub const GROUP_CSV: &str = "group.csv";
pub const BITMAP_CSV: &str = "bitmap.csv";

/// Line-oriented writer for one output artifact.
///
/// Lines go to a temporary file next to the final one; nothing appears
/// under the artifact's name until [`Staged::persist`].
struct CsvFile {
    path: PathBuf,
    out: BufWriter<NamedTempFile>,
}

/// A fully written artifact waiting for its final name.
struct Staged {
    path: PathBuf,
    file: NamedTempFile,
}

impl CsvFile {
    fn create(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(name);
        let file = NamedTempFile::new_in(dir).map_err(|source| Ext2Error::OutputWrite {
            path: path.clone(),
            source,
        })?;
        Ok(CsvFile {
            path,
            out: BufWriter::new(file),
        })
    }

    fn line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line).map_err(|source| Ext2Error::OutputWrite {
            path: self.path.clone(),
            source,
        })
    }

    fn finish(self) -> Result<Staged> {
        let path = self.path;
        let file = self
            .out
            .into_inner()
            .map_err(|e| Ext2Error::OutputWrite {
                path: path.clone(),
                source: e.into_error(),
            })?;
        Ok(Staged { path, file })
    }
}

impl Staged {
    fn persist(self) -> Result<PathBuf> {
        let path = self.path;
        self.file
            .persist(&path)
            .map_err(|e| Ext2Error::OutputWrite {
                path: path.clone(),
                source: e.error,
            })?;
        Ok(path)
    }
}

fn stage_superblock_csv(dir: &Path, summary: &SuperblockSummary) -> Result<Staged> {
    let mut csv = CsvFile::create(dir, SUPERBLOCK_CSV)?;
    csv.line(&summary.to_csv_line())?;
    csv.finish()
}

fn stage_group_csv(dir: &Path, groups: &[GroupSummary]) -> Result<Staged> {
    let mut csv = CsvFile::create(dir, GROUP_CSV)?;
    for group in groups {
        csv.line(&group.to_csv_line())?;
    }
    csv.finish()
}

/// Stream scan results into `bitmap.csv`, returning how many were written.
fn stage_bitmap_csv<I, F>(dir: &Path, records: I, mut visit: F) -> Result<(Staged, usize)>
where
    I: IntoIterator<Item = Result<FreeResource>>,
    F: FnMut(&FreeResource),
{
    let mut csv = CsvFile::create(dir, BITMAP_CSV)?;
    let mut count = 0;
    for record in records {
        let record = record?;
        csv.line(&record.to_csv_line())?;
        visit(&record);
        count += 1;
    }
    Ok((csv.finish()?, count))
}

pub fn write_superblock_csv(dir: &Path, summary: &SuperblockSummary) -> Result<PathBuf> {
    stage_superblock_csv(dir, summary)?.persist()
}

pub fn write_group_csv(dir: &Path, groups: &[GroupSummary]) -> Result<PathBuf> {
    stage_group_csv(dir, groups)?.persist()
}

pub fn write_bitmap_csv<I>(dir: &Path, records: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = Result<FreeResource>>,
{
    let (staged, _) = stage_bitmap_csv(dir, records, |_| {})?;
    staged.persist()
}

/// Write the three artifacts of an image into `dir`.
///
/// A damaged image leaves no output behind: the artifacts only take their
/// names once the whole scan has succeeded.
pub fn write_all<R: ReadAt>(fs: &Ext2Image<R>, dir: &Path) -> Result<()> {
    write_all_with(fs, dir, |_| {})
}

/// Like [`write_all`], handing every free record to `visit` as it is
/// written so callers can reuse the single bitmap scan.
pub fn write_all_with<R, F>(fs: &Ext2Image<R>, dir: &Path, visit: F) -> Result<()>
where
    R: ReadAt,
    F: FnMut(&FreeResource),
{
    let groups = fs.group_summaries();
    let superblock = stage_superblock_csv(dir, &fs.superblock.summary())?;
    let group = stage_group_csv(dir, &groups)?;
    let (bitmap, free) = stage_bitmap_csv(dir, fs.free_resources(), visit)?;

    let path = superblock.persist()?;
    info!("Wrote {}", path.display());
    let path = group.persist()?;
    info!("Wrote {} groups to {}", groups.len(), path.display());
    let path = bitmap.persist()?;
    info!("Wrote {} free entries to {}", free, path.display());
    Ok(())
}

/// The JSON document for an image whose free records are already known.
pub fn json_document<R: ReadAt>(fs: &Ext2Image<R>, free: &[FreeResource]) -> Value {
    let groups: Vec<Value> = fs.group_summaries().iter().map(|g| g.to_json()).collect();
    json!({
        "superblock": fs.superblock.to_json(),
        "groups": groups,
        "free": serde_json::to_value(free).unwrap_or_else(|_| json!([])),
    })
}

/// Everything the dumper knows about an image as one JSON document.
pub fn to_json<R: ReadAt>(fs: &Ext2Image<R>) -> Result<Value> {
    let free = fs.free_resources().collect::<Result<Vec<FreeResource>>>()?;
    Ok(json_document(fs, &free))
}
