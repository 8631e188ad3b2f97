use anyhow::{bail, Result};
use env_logger::Env;
use log::info;

use sqlite_index_blaster::{ColumnValue, IndexBlaster, SqibConfig};

/// Demo driver: builds an index file from synthetic rows, closes it, reopens
/// it, and confirms every row is still reachable by key.
fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = std::env::args().collect::<Vec<_>>();
    let (path, row_count) = match args.len() {
        1 => ("demo_index.db".to_string(), 1000u32),
        2 => (args[1].clone(), 1000u32),
        _ => {
            let n: u32 = args[2]
                .parse()
                .map_err(|_| anyhow::anyhow!("row count must be an integer"))?;
            (args[1].clone(), n)
        }
    };

    let config = SqibConfig {
        column_count: 2,
        pk_count: 1,
        column_names: "id,payload".to_string(),
        table_name: "demo_idx".to_string(),
        page_size: 4096,
        cache_size: 64,
        file_name: path.clone(),
    };

    {
        let mut blaster = IndexBlaster::open(config.clone())?;
        for i in 0..row_count {
            blaster.put(&[
                ColumnValue::Int32(i as i32),
                ColumnValue::Text(format!("row-{i}")),
            ])?;
        }
        blaster.close()?;
        info!("wrote {row_count} rows to {path}");
    }

    {
        let mut blaster = IndexBlaster::open(config)?;
        for i in 0..row_count {
            let row = blaster.get(&[ColumnValue::Int32(i as i32)])?;
            if row.is_none() {
                bail!("row {i} missing after reopen");
            }
        }
        info!("verified {row_count} rows readable after reopen");
    }

    Ok(())
}
