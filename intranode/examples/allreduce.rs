//! bf16 all-reduce across 4 simulated devices.
//!
//! Each rank starts with its own data. After the all-reduce, every rank
//! holds the element-wise sum of all inputs.
//!
//! ```bash
//! cargo run --example allreduce
//! ```

use half::bf16;
use intranode::{
    AllReduceAlgo, HostRuntime, IntraNodeComm, IntraNodeConfig, TensorDesc, Topology,
    bootstrap_local, fully_connected_links,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> intranode::Result<()> {
    let world_size = 4;
    let comms: Vec<Arc<IntraNodeComm>> = bootstrap_local(
        world_size,
        Topology::FullyConnected,
        &fully_connected_links(world_size),
        IntraNodeConfig::from_env(),
        Arc::new(HostRuntime::new()),
    )?
    .into_iter()
    .map(Arc::new)
    .collect();

    let count = 8usize;

    // Selection is a pure function of the request, so every rank agrees.
    let algo = comms[0].select_algorithm(&TensorDesc::bf16(count, 0))?;
    if algo == AllReduceAlgo::None {
        println!("no algorithm applies, use the fallback collective");
        return Ok(());
    }
    println!("selected {algo}");

    // rank 0: [0.0, 0.0, ...], rank 1: [1.0, 1.0, ...], etc.
    let mut handles = Vec::new();
    for comm in &comms {
        let desc = TensorDesc::bf16(count, comm.rank());
        let data = vec![bf16::from_f32(comm.rank() as f32); count];
        handles.push((comm.rank(), comm.all_reduce_async(desc, data, algo)));
    }

    for (rank, handle) in handles {
        let data = handle.wait().await?;
        println!("rank {rank}: {data:?}");
    }
    // Output (all ranks identical):
    // rank 0: [6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0]
    // ...

    Ok(())
}
