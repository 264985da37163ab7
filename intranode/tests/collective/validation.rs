use half::bf16;
use intranode::{
    AllReduceAlgo, DataType, ErrorKind, HostRuntime, IntraNodeConfig, IntraNodeError, TensorDesc,
    Topology, bootstrap_local,
};
use std::sync::Arc;
use std::time::Duration;

use super::helpers::{
    cube_mesh, cube_mesh_links, expected_sum, fully_connected, rank_input, run_ranks, test_config,
};

#[test]
fn test_rejects_other_formats() {
    let comms = fully_connected(2, test_config(1 << 16));
    let mut data = vec![bf16::ONE; 64];
    let desc = TensorDesc {
        dtype: DataType::F32,
        numel: 64,
        contiguous: true,
        device: 0,
    };
    assert_eq!(comms[0].select_algorithm(&desc).unwrap(), AllReduceAlgo::None);
    assert!(!comms[0].try_all_reduce(&desc, &mut data).unwrap());

    let err = comms[0]
        .all_reduce(&desc, &mut data, AllReduceAlgo::SmallBuffer)
        .unwrap_err();
    assert!(matches!(
        err,
        IntraNodeError::UnsupportedDType {
            dtype: DataType::F32,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_rejects_layout_and_placement() {
    let comms = fully_connected(2, test_config(1 << 16));
    let mut data = vec![bf16::ONE; 64];

    let strided = TensorDesc {
        contiguous: false,
        ..TensorDesc::bf16(64, 0)
    };
    let err = comms[0]
        .all_reduce(&strided, &mut data, AllReduceAlgo::SmallBuffer)
        .unwrap_err();
    assert!(matches!(err, IntraNodeError::NonContiguous));
    assert_eq!(err.kind(), ErrorKind::Precondition);

    let elsewhere = TensorDesc::bf16(64, 1);
    let err = comms[0]
        .all_reduce(&elsewhere, &mut data, AllReduceAlgo::SmallBuffer)
        .unwrap_err();
    assert!(matches!(
        err,
        IntraNodeError::WrongDevice {
            expected: 0,
            actual: 1
        }
    ));

    let short = TensorDesc::bf16(65, 0);
    let err = comms[0]
        .all_reduce(&short, &mut data, AllReduceAlgo::SmallBuffer)
        .unwrap_err();
    assert!(matches!(err, IntraNodeError::BufferSizeMismatch { .. }));
}

#[test]
fn test_rejects_none_and_mismatched_algorithms() {
    let comms = fully_connected(2, test_config(1 << 16));
    let mut data = vec![bf16::ONE; 64];
    let desc = TensorDesc::bf16(64, 0);

    let err = comms[0]
        .all_reduce(&desc, &mut data, AllReduceAlgo::None)
        .unwrap_err();
    assert!(matches!(err, IntraNodeError::NoAlgorithm));

    let err = comms[0]
        .all_reduce(&desc, &mut data, AllReduceAlgo::MeshRelay)
        .unwrap_err();
    assert!(matches!(err, IntraNodeError::AlgorithmMismatch { .. }));

    let mesh = cube_mesh(test_config(1 << 16));
    let err = mesh[0]
        .all_reduce(&desc, &mut data, AllReduceAlgo::SmallBuffer)
        .unwrap_err();
    assert!(matches!(err, IntraNodeError::AlgorithmMismatch { .. }));
}

#[test]
fn test_rejects_inputs_past_capacity() {
    let comms = fully_connected(2, test_config(4096));
    let mut data = vec![bf16::ONE; 4096];
    let desc = TensorDesc::bf16(4096, 0);
    assert_eq!(comms[0].select_algorithm(&desc).unwrap(), AllReduceAlgo::None);
    // Sizes that overflow once padded also decline rather than wrap.
    let huge = TensorDesc::bf16(usize::MAX, 0);
    assert_eq!(comms[0].select_algorithm(&huge).unwrap(), AllReduceAlgo::None);
    let err = comms[0]
        .all_reduce(&desc, &mut data, AllReduceAlgo::SmallBuffer)
        .unwrap_err();
    assert!(matches!(
        err,
        IntraNodeError::CapacityExceeded {
            required: 8192,
            capacity: 4096
        }
    ));

    // Mesh relay needs the scratch half on top of the input.
    let mesh = cube_mesh(test_config(8192));
    let err = mesh[0]
        .all_reduce(&desc, &mut data, AllReduceAlgo::MeshRelay)
        .unwrap_err();
    assert!(matches!(
        err,
        IntraNodeError::CapacityExceeded {
            required: 16384,
            ..
        }
    ));
}

#[test]
fn test_disabled_declines_everything() {
    let config = IntraNodeConfig {
        enabled: false,
        ..test_config(1 << 16)
    };
    let comms = fully_connected(2, config);
    let desc = TensorDesc::bf16(64, 0);
    assert_eq!(comms[0].select_algorithm(&desc).unwrap(), AllReduceAlgo::None);
}

#[test]
fn test_mesh_requires_eight_ranks() {
    let err = bootstrap_local(
        4,
        Topology::HybridCubeMesh,
        &cube_mesh_links(),
        test_config(1 << 16),
        Arc::new(HostRuntime::new()),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Topology);
}

#[test]
fn test_shape_mismatch_fails_every_rank() {
    let config = IntraNodeConfig {
        verify_shape: true,
        ..test_config(1 << 16)
    };
    let comms = fully_connected(3, config);

    let results = run_ranks(&comms, |comm| {
        let numel = if comm.rank() == 0 { 1000 } else { 300 };
        let mut data = rank_input(comm.rank(), numel);
        let desc = TensorDesc::bf16(numel, comm.rank());
        comm.all_reduce(&desc, &mut data, AllReduceAlgo::SmallBuffer)
    });
    for r in results {
        let err = r.unwrap_err();
        assert!(matches!(err, IntraNodeError::ShapeMismatch { .. }), "{err}");
    }

    // The group is still usable once every rank agrees again.
    let outputs = run_ranks(&comms, |comm| {
        let mut data = rank_input(comm.rank(), 300);
        let desc = TensorDesc::bf16(300, comm.rank());
        comm.all_reduce(&desc, &mut data, AllReduceAlgo::SmallBuffer)
            .unwrap();
        data
    });
    for out in outputs {
        assert_eq!(out, expected_sum(3, 300));
    }
}

#[test]
fn test_algorithm_disagreement_fails_every_rank() {
    let config = IntraNodeConfig {
        verify_shape: true,
        ..test_config(1 << 16)
    };
    let comms = fully_connected(2, config);

    // 4096 elements pad to 4096 under both kernels, so only the algorithm differs.
    let results = run_ranks(&comms, |comm| {
        let algo = if comm.rank() == 0 {
            AllReduceAlgo::SmallBuffer
        } else {
            AllReduceAlgo::Sharded
        };
        let mut data = rank_input(comm.rank(), 4096);
        comm.all_reduce(&TensorDesc::bf16(4096, comm.rank()), &mut data, algo)
    });
    for r in results {
        let err = r.unwrap_err();
        assert!(
            matches!(err, IntraNodeError::AlgorithmDisagreement { .. }),
            "{err}"
        );
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }
    for comm in &comms {
        assert_eq!(comm.usage_count(), 0);
    }

    let outputs = run_ranks(&comms, |comm| {
        let mut data = rank_input(comm.rank(), 4096);
        comm.all_reduce(
            &TensorDesc::bf16(4096, comm.rank()),
            &mut data,
            AllReduceAlgo::Sharded,
        )
        .unwrap();
        data
    });
    for out in outputs {
        assert_eq!(out, expected_sum(2, 4096));
    }
}

#[test]
fn test_missing_peer_times_out() {
    let config = IntraNodeConfig {
        acquire_timeout: Some(Duration::from_millis(100)),
        ..test_config(1 << 16)
    };
    let comms = fully_connected(2, config);
    let mut data = vec![bf16::ONE; 512];
    let desc = TensorDesc::bf16(512, 0);
    let err = comms[0]
        .all_reduce(&desc, &mut data, AllReduceAlgo::SmallBuffer)
        .unwrap_err();
    assert!(
        matches!(err, IntraNodeError::AcquireTimeout { rank: 0, peer: 1, .. }),
        "{err}"
    );
    assert_eq!(err.kind(), ErrorKind::DeviceRuntime);
    assert_eq!(comms[0].usage_count(), 0);
}
