use intranode::launch::aligned_numel;
use intranode::{
    AllReduceAlgo, DataType, IntraNodeError, LaunchPlan, TensorDesc, Topology, select_algorithm,
};
use proptest::prelude::*;

fn arb_other_dtype() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::F32),
        Just(DataType::F64),
        Just(DataType::F16),
        Just(DataType::I8),
        Just(DataType::I32),
        Just(DataType::I64),
        Just(DataType::U8),
    ]
}

#[test]
fn test_thresholds_at_256_kib() {
    let at = TensorDesc::bf16(131_072, 0);
    let above = TensorDesc::bf16(131_073, 0);
    assert_eq!(
        select_algorithm(&at, Topology::FullyConnected, 4).unwrap(),
        AllReduceAlgo::SmallBuffer
    );
    assert_eq!(
        select_algorithm(&above, Topology::FullyConnected, 4).unwrap(),
        AllReduceAlgo::Sharded
    );
    assert_eq!(
        select_algorithm(&at, Topology::HybridCubeMesh, 8).unwrap(),
        AllReduceAlgo::MeshRelay
    );
    assert_eq!(
        select_algorithm(&above, Topology::HybridCubeMesh, 8).unwrap(),
        AllReduceAlgo::None
    );
}

#[test]
fn test_beyond_ten_mib_declines() {
    let desc = TensorDesc::bf16(6 * 1024 * 1024, 0);
    assert_eq!(
        select_algorithm(&desc, Topology::FullyConnected, 8).unwrap(),
        AllReduceAlgo::None
    );
}

proptest! {
    /// Non-bf16 inputs are declined on every topology and size.
    #[test]
    fn prop_other_formats_declined(
        dtype in arb_other_dtype(),
        numel in 0usize..1 << 24,
        world in 1usize..=8,
        mesh in any::<bool>(),
    ) {
        let desc = TensorDesc { dtype, numel, contiguous: true, device: 0 };
        let topology = if mesh {
            Topology::HybridCubeMesh
        } else {
            Topology::FullyConnected
        };
        prop_assert_eq!(select_algorithm(&desc, topology, world).unwrap(), AllReduceAlgo::None);
    }

    /// Fully connected groups pick the cheapest path the size allows.
    #[test]
    fn prop_fully_connected_monotone(numel in 0usize..6 * 1024 * 1024, world in 1usize..=8) {
        let desc = TensorDesc::bf16(numel, 0);
        let algo = select_algorithm(&desc, Topology::FullyConnected, world).unwrap();
        let unit = 256;
        let small = numel.div_ceil(unit) * unit * 2;
        let sharded = numel.div_ceil(unit * world) * unit * world * 2;
        let expected = if small <= 256 * 1024 {
            AllReduceAlgo::SmallBuffer
        } else if sharded <= 10 * 1024 * 1024 {
            AllReduceAlgo::Sharded
        } else {
            AllReduceAlgo::None
        };
        prop_assert_eq!(algo, expected);
    }

    /// The mesh never selects a fully-connected path.
    #[test]
    fn prop_mesh_only_relays(numel in 0usize..1 << 20) {
        let desc = TensorDesc::bf16(numel, 0);
        let algo = select_algorithm(&desc, Topology::HybridCubeMesh, 8).unwrap();
        prop_assert!(matches!(algo, AllReduceAlgo::MeshRelay | AllReduceAlgo::None));
        prop_assert_eq!(algo == AllReduceAlgo::MeshRelay, numel <= 131_072);
    }
}

proptest! {
    /// Selection is total: sizes near the top of the address space fall back
    /// instead of overflowing.
    #[test]
    fn prop_selection_total_near_overflow(gap in 0usize..1 << 16, world in 1usize..=8) {
        let desc = TensorDesc::bf16(usize::MAX - gap, 0);
        let algo = select_algorithm(&desc, Topology::FullyConnected, world).unwrap();
        prop_assert_eq!(algo, AllReduceAlgo::None);
        let plan = LaunchPlan::new(usize::MAX - gap, AllReduceAlgo::Sharded, world, 24);
        prop_assert!(matches!(plan, Err(IntraNodeError::SizeOverflow { .. })), "expected SizeOverflow, got {:?}", plan);
    }

    /// Padding is the smallest multiple of the algorithm's unit at or above N.
    #[test]
    fn prop_alignment_is_tight(numel in 0usize..1 << 22, world in 1usize..=8) {
        for algo in [AllReduceAlgo::SmallBuffer, AllReduceAlgo::Sharded, AllReduceAlgo::MeshRelay] {
            let unit = 256 * if algo == AllReduceAlgo::Sharded { world } else { 1 };
            let aligned = aligned_numel(numel, algo, world).unwrap();
            prop_assert_eq!(aligned % unit, 0);
            prop_assert!(aligned >= numel);
            prop_assert!(aligned < numel + unit);
        }
    }

    /// Every lane offset below the padded length is visited by exactly one
    /// block.
    #[test]
    fn prop_lanes_cover_once(numel in 1usize..200_000, world in 1usize..=8, max_blocks in 1usize..=24) {
        let plan = LaunchPlan::new(numel, AllReduceAlgo::Sharded, world, max_blocks).unwrap();
        let mut seen = vec![false; plan.numel_aligned / 8];
        for b in 0..plan.blocks {
            for off in plan.block(b).lane_offsets(plan.numel_aligned) {
                prop_assert_eq!(off % 8, 0);
                prop_assert!(!seen[off / 8], "offset {} visited twice", off);
                seen[off / 8] = true;
            }
        }
        prop_assert!(seen.iter().all(|s| *s));
    }
}
