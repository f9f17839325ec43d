pub mod run;
pub mod table;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use gpu_dvfs::PerformanceTable;

// BUILT-IN TABLE WHEN NO FILE IS GIVEN. *.gz FILES ARE DECOMPRESSED FIRST.
pub fn load_table(path: Option<&Path>) -> Result<PerformanceTable> {
    let path = match path {
        Some(p) => p,
        None => return Ok(PerformanceTable::default_table()),
    };

    let file = std::fs::File::open(path)
        .with_context(|| format!("CANNOT OPEN TABLE {}", path.display()))?;

    let mut text = String::new();
    if path.extension().map_or(false, |e| e == "gz") {
        flate2::read::GzDecoder::new(file)
            .read_to_string(&mut text)
            .with_context(|| format!("CANNOT DECOMPRESS {}", path.display()))?;
    } else {
        let mut file = file;
        file.read_to_string(&mut text)
            .with_context(|| format!("CANNOT READ {}", path.display()))?;
    }

    PerformanceTable::parse(&text).with_context(|| format!("INVALID TABLE {}", path.display()))
}
