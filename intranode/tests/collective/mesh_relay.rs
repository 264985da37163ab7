use half::bf16;
use intranode::{AllReduceAlgo, TensorDesc, Topology};

use super::helpers::{cube_mesh, expected_sum, rank_input, run_ranks, test_config};

#[test]
fn test_mesh_mapping_before_reduction() {
    let comms = cube_mesh(test_config(1 << 20));
    let expected: [[u32; 4]; 8] = [
        [1, 2, 3, 4],
        [0, 3, 2, 5],
        [3, 0, 1, 6],
        [2, 1, 0, 7],
        [5, 6, 7, 0],
        [4, 7, 6, 1],
        [7, 4, 5, 2],
        [6, 5, 4, 3],
    ];
    for (comm, row) in comms.iter().zip(expected) {
        assert_eq!(comm.topology(), Topology::HybridCubeMesh);
        assert_eq!(comm.hcm_peers().unwrap().all(), row, "rank {}", comm.rank());
    }

    let outputs = run_ranks(&comms, |comm| {
        let mut data = rank_input(comm.rank(), 5000);
        let desc = TensorDesc::bf16(5000, comm.rank());
        assert_eq!(comm.select_algorithm(&desc).unwrap(), AllReduceAlgo::MeshRelay);
        comm.all_reduce(&desc, &mut data, AllReduceAlgo::MeshRelay)
            .unwrap();
        data
    });
    let expected = expected_sum(8, 5000);
    for out in outputs {
        assert_eq!(out, expected);
    }
}

#[test]
fn test_mesh_relay_declines_large_inputs() {
    let comms = cube_mesh(test_config(1 << 20));
    let desc = TensorDesc::bf16(200_000, 0);
    assert_eq!(comms[0].select_algorithm(&desc).unwrap(), AllReduceAlgo::None);
    let mut data = vec![bf16::ONE; 200_000];
    assert!(!comms[0].try_all_reduce(&desc, &mut data).unwrap());
    assert!(data.iter().all(|v| *v == bf16::ONE));
}

#[test]
fn test_mesh_relay_repeated_calls() {
    let comms = cube_mesh(test_config(1 << 20));
    let outputs = run_ranks(&comms, |comm| {
        (0..10usize)
            .map(|round| {
                let numel = 1 + round * 301;
                let mut data = rank_input(comm.rank(), numel);
                let desc = TensorDesc::bf16(numel, comm.rank());
                comm.all_reduce(&desc, &mut data, AllReduceAlgo::MeshRelay)
                    .unwrap();
                data
            })
            .collect::<Vec<_>>()
    });
    for rounds in outputs {
        for (round, out) in rounds.iter().enumerate() {
            assert_eq!(out, &expected_sum(8, 1 + round * 301), "round {round}");
        }
    }
}
