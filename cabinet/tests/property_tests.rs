//! Property-based tests for the typed codecs and the pager.

use cabinet::{Cabinet, CabinetSettings, CompiledFunction, Ptr};
use proptest::prelude::*;
use tempfile::TempDir;

const DRAWER: usize = 4096;

fn cabinet(dir: &TempDir) -> Cabinet {
    Cabinet::new(CabinetSettings {
        heap_size: 4 * DRAWER,
        drawer_size: DRAWER,
        max_virtual_drawers: 64,
        swap_path: Some(dir.path().join("prop.swap")),
        ..Default::default()
    })
    .unwrap()
}

/// Pointers anywhere in the virtual address space; they are stored, never followed.
fn any_ptr() -> impl Strategy<Value = Ptr> {
    (0u32..64, 0u32..512).prop_map(|(drawer, word)| Ptr::new(drawer, word * 8))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn integers_round_trip(v in any::<i64>()) {
        let dir = TempDir::new().unwrap();
        let cab = cabinet(&dir);
        let p = cab.alloc_integer(v).unwrap();
        prop_assert_eq!(cab.read_integer(p).unwrap(), v);
    }

    #[test]
    fn float_bits_round_trip(v in any::<f64>()) {
        let dir = TempDir::new().unwrap();
        let cab = cabinet(&dir);
        let p = cab.alloc_float(v).unwrap();
        prop_assert_eq!(cab.read_float(p).unwrap().to_bits(), v.to_bits());
    }

    #[test]
    fn booleans_round_trip(v in any::<bool>()) {
        let dir = TempDir::new().unwrap();
        let cab = cabinet(&dir);
        let p = cab.alloc_boolean(v).unwrap();
        prop_assert_eq!(cab.read_boolean(p).unwrap(), v);
    }

    #[test]
    fn strings_round_trip_with_exact_size(s in ".{0,300}") {
        let dir = TempDir::new().unwrap();
        let cab = cabinet(&dir);
        let p = cab.alloc_string(&s).unwrap();
        prop_assert_eq!(cab.read_string(p).unwrap(), s.clone());
        let size = cab.read_header(p).unwrap().size as usize;
        prop_assert_eq!(size, cabinet::align8(16 + 4 + s.len()));
    }

    #[test]
    fn arrays_round_trip(items in prop::collection::vec(any_ptr(), 0..64)) {
        let dir = TempDir::new().unwrap();
        let cab = cabinet(&dir);
        let p = cab.alloc_array(&items).unwrap();
        prop_assert_eq!(cab.read_array(p).unwrap(), items.clone());
        prop_assert_eq!(cab.array_len(p).unwrap(), items.len());
    }

    #[test]
    fn compiled_functions_round_trip(
        locals in any::<u32>(),
        params in any::<u32>(),
        code in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let dir = TempDir::new().unwrap();
        let cab = cabinet(&dir);
        let func = CompiledFunction { num_locals: locals, num_params: params, instructions: code };
        let p = cab.alloc_compiled_function(&func).unwrap();
        prop_assert_eq!(cab.read_compiled_function(p).unwrap(), func);
    }

    /// Whatever drawers get evicted in between, every value reads back.
    #[test]
    fn values_survive_any_eviction_order(
        values in prop::collection::vec(any::<i64>(), 1..40),
        evictions in prop::collection::vec(0u32..16, 0..20),
    ) {
        let dir = TempDir::new().unwrap();
        let cab = cabinet(&dir);
        let mut stored = Vec::new();
        for v in &values {
            // pad so the values spread over several drawers
            cab.alloc(512).unwrap();
            stored.push((cab.alloc_integer(*v).unwrap(), *v));
        }
        for id in evictions {
            let _ = cab.evict(id);
        }
        for (p, v) in stored {
            prop_assert_eq!(cab.read_integer(p).unwrap(), v);
        }
        let stats = cab.stats();
        prop_assert_eq!(stats.resident + stats.swapped + stats.fresh, stats.drawers);
    }
}
