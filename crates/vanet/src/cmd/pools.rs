use vanet_pool::PoolAllocator;

use crate::cmd::PoolsArgs;
use crate::config::BoardConfig;
use crate::exit::{pool_error, CliResult, SUCCESS};
use crate::output::{print_pools, OutputFormat};

pub fn run(args: PoolsArgs, format: OutputFormat) -> CliResult<i32> {
    let config = BoardConfig::load(args.config.as_deref())?;
    let pools =
        PoolAllocator::new(config.pools.clone()).map_err(|err| pool_error("invalid pool table", err))?;

    let mut held = Vec::with_capacity(args.alloc.len());
    for size in &args.alloc {
        let id = pools
            .try_alloc(*size)
            .map_err(|err| pool_error(&format!("alloc of {size} bytes failed"), err))?;
        tracing::debug!(size, pool = id.pool(), slot = id.slot(), "allocated");
        held.push(id);
    }

    print_pools(&pools.stats(), pools.boundary_check(), format);

    for id in held {
        pools
            .try_free(id)
            .map_err(|err| pool_error("free failed", err))?;
    }
    Ok(SUCCESS)
}
