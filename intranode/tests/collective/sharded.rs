use half::bf16;
use intranode::{AllReduceAlgo, TensorDesc};

use super::helpers::{
    expected_sum, fully_connected, inexact_input, rank_input, rank_order_sum, run_ranks,
    test_config,
};

#[test]
fn test_sharded_2_to_8_ranks() {
    for world in 2..=8 {
        let comms = fully_connected(world, test_config(1 << 20));
        // Not a multiple of 256 * world for any world size here.
        let numel = 150_001;
        let outputs = run_ranks(&comms, |comm| {
            let mut data = rank_input(comm.rank(), numel);
            let desc = TensorDesc::bf16(numel, comm.rank());
            assert_eq!(comm.select_algorithm(&desc).unwrap(), AllReduceAlgo::Sharded);
            comm.all_reduce(&desc, &mut data, AllReduceAlgo::Sharded)
                .unwrap();
            data
        });
        let expected = expected_sum(world, numel);
        for (rank, out) in outputs.iter().enumerate() {
            assert_eq!(out, &expected, "world {world} rank {rank}");
        }
    }
}

#[test]
fn test_sharded_small_input_still_correct() {
    // Below the small-buffer threshold, but callers may force sharded.
    let comms = fully_connected(4, test_config(1 << 20));
    let outputs = run_ranks(&comms, |comm| {
        let mut data = vec![bf16::from_f32(comm.rank() as f32 + 1.0); 4096];
        let desc = TensorDesc::bf16(4096, comm.rank());
        comm.all_reduce(&desc, &mut data, AllReduceAlgo::Sharded)
            .unwrap();
        data
    });
    for out in outputs {
        assert!(out.iter().all(|v| *v == bf16::from_f32(10.0)));
    }
}

#[test]
fn test_sharded_repeated_calls_restage() {
    let comms = fully_connected(3, test_config(1 << 20));
    let outputs = run_ranks(&comms, |comm| {
        (0..5)
            .map(|round| {
                let mut data = vec![bf16::from_f32((comm.rank() + round) as f32); 10_000];
                let desc = TensorDesc::bf16(10_000, comm.rank());
                comm.all_reduce(&desc, &mut data, AllReduceAlgo::Sharded)
                    .unwrap();
                data
            })
            .collect::<Vec<_>>()
    });
    for rounds in outputs {
        for (round, out) in rounds.iter().enumerate() {
            // (0 + 1 + 2) + 3 * round
            let expected = bf16::from_f32((3 + 3 * round) as f32);
            assert!(out.iter().all(|v| *v == expected), "round {round}");
        }
    }
}

#[test]
fn test_sharded_inexact_matches_rank_order() {
    for world in [2, 3, 5, 8] {
        let comms = fully_connected(world, test_config(1 << 20));
        let numel = 150_001;
        let outputs = run_ranks(&comms, |comm| {
            let mut data = inexact_input(comm.rank(), numel);
            let desc = TensorDesc::bf16(numel, comm.rank());
            comm.all_reduce(&desc, &mut data, AllReduceAlgo::Sharded)
                .unwrap();
            data
        });
        let expected = rank_order_sum(world, numel);
        for (rank, out) in outputs.iter().enumerate() {
            let bits: Vec<u16> = out.iter().map(|v| v.to_bits()).collect();
            let want: Vec<u16> = expected.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits, want, "world {world} rank {rank}");
        }
    }
}
