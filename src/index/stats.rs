use crate::aim::AimReader;
use crate::error::{BuildError, Result};
use crate::index::reader::IndexReader;
use crate::request::BuildContext;
use crate::spec::header::{AimHeader, IsiHeader};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Summary of an ISI file.
#[derive(Debug, Clone)]
pub struct IsiStats {
    pub source_name: String,
    pub arguments: Vec<String>,
    pub version: u32,
    pub header: IsiHeader,
    pub height: usize,
    pub leaf_blocks: u64,
    pub branch_blocks: u64,
    pub keys: u64,
    pub deleted: usize,
    /// Order check failure, if any.
    pub order_error: Option<String>,
}

/// Summary of an AIM file.
#[derive(Debug, Clone)]
pub struct AimStats {
    pub source_name: String,
    pub arguments: Vec<String>,
    pub version: u32,
    pub header: AimHeader,
    pub density: Vec<f64>,
}

#[derive(Debug, Clone)]
pub enum FileStats {
    Isi(IsiStats),
    Aim(AimStats),
}

/// Gather statistics, telling the format from the first header byte.
pub fn file_stats(path: &Path, ctx: &BuildContext) -> Result<FileStats> {
    let mut tag = [0u8; 1];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut tag))
        .map_err(|e| BuildError::open(path, e))?;

    match tag[0] {
        b'I' => {
            let reader = IndexReader::open(path)?;
            let (source_name, arguments) = reader.stored_header().stored_arguments()?;
            let walk = reader.walk()?;
            let order_error = reader
                .verify(ctx.collation.as_ref())
                .err()
                .map(|e| e.detail());
            Ok(FileStats::Isi(IsiStats {
                source_name,
                arguments,
                version: reader.stored_header().version(),
                header: reader.header().clone(),
                height: walk.height,
                leaf_blocks: walk.leaf_blocks,
                branch_blocks: walk.branch_blocks,
                keys: walk.entries.len() as u64,
                deleted: reader.deleted_positions()?.len(),
                order_error,
            }))
        }
        b'A' => {
            let reader = AimReader::open_with(path, ctx.case_map.clone())?;
            let (source_name, arguments) = reader.stored_header().stored_arguments()?;
            Ok(FileStats::Aim(AimStats {
                source_name,
                arguments,
                version: reader.stored_header().version(),
                header: reader.header().clone(),
                density: reader.plane_density(),
            }))
        }
        b'i' | b'a' => Err(BuildError::BadHeader(
            "Index build did not complete".into(),
        )),
        _ => Err(BuildError::BadHeader("Not an ISI or AIM file".into())),
    }
}

/// Display index statistics
pub fn show_stats(path: &Path, ctx: &BuildContext) -> Result<()> {
    match file_stats(path, ctx)? {
        FileStats::Isi(stats) => {
            println!("Index Statistics");
            println!("================");
            println!();
            println!("Source:           {}", stats.source_name);
            println!("Arguments:        {}", stats.arguments.join(" "));
            println!("Version:          {}", stats.version);
            println!("Block size:       {}", stats.header.block_size);
            println!("Key length:       {}", stats.header.key_size);
            println!(
                "Duplicates:       {}",
                if stats.header.allow_duplicates { "allowed" } else { "rejected" }
            );
            if let Some(len) = stats.header.fixed_length {
                println!("Record length:    {len}");
            }
            println!();
            println!("Height:           {}", stats.height);
            println!("Leaf blocks:      {}", stats.leaf_blocks);
            println!("Branch blocks:    {}", stats.branch_blocks);
            println!("Keys:             {}", stats.keys);
            println!("Deleted records:  {}", stats.deleted);
            match stats.order_error {
                None => println!("Key order:        ok"),
                Some(err) => println!("Key order:        {err}"),
            }
        }
        FileStats::Aim(stats) => {
            let h = &stats.header;
            println!("AIM Statistics");
            println!("==============");
            println!();
            println!("Source:           {}", stats.source_name);
            println!("Arguments:        {}", stats.arguments.join(" "));
            println!("Version:          {}", stats.version);
            println!("Slots:            {}", h.slot_count);
            println!("Record length:    {}", h.record_length);
            println!("Record count:     {}", h.record_count);
            println!("Organization:     {:?}", h.organization);
            println!("Case:             {}", if h.distinct { "distinct" } else { "folded" });
            println!("Wildcard:         {}", h.wildcard as char);
            if h.first_deleted > 0 {
                println!("First deleted:    {}", h.first_deleted - 1);
            }
            println!();
            println!("Plane density:");
            for (slot, density) in stats.density.iter().enumerate() {
                println!("  {slot:5} {:6.2}%", density * 100.0);
            }
        }
    }
    Ok(())
}
