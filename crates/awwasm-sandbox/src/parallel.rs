//! Parallel instantiation of independent modules (feature `parallel`).
//!
//! Instances never share mutable state across stores, so each module gets
//! its own store and the stores are built on the Rayon pool.

use std::sync::Arc;

use rayon::prelude::*;

use crate::config::AwwasmConfig;
use crate::error::AwwasmInstantiationError;
use crate::instance::AwwasmModuleInst;
use crate::module::AwwasmModule;
use crate::store::AwwasmStore;

/// Instantiate every module in a fresh store of its own.
///
/// `setup` runs on each new store before instantiation, typically to
/// define host imports. Results keep the order of `modules`.
pub fn instantiate_isolated<F>(
    modules: &[AwwasmModule],
    config: &AwwasmConfig,
    setup: F,
) -> Vec<Result<(AwwasmStore, Arc<AwwasmModuleInst>), AwwasmInstantiationError>>
where
    F: Fn(&mut AwwasmStore) -> Result<(), AwwasmInstantiationError> + Sync,
{
    modules
        .par_iter()
        .map(|module| {
            let mut store = AwwasmStore::with_config(config.clone());
            setup(&mut store)?;
            let inst = store.instantiate(module, None)?;
            Ok((store, inst))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::{AwwasmGlobalInst, AwwasmGlobalType};
    use crate::imports::AwwasmImports;
    use crate::memory::AwwasmMemoryType;
    use crate::module::AwwasmImportDesc;
    use crate::values::{AwwasmValue, AwwasmValueType};

    #[test]
    fn test_instantiate_isolated_keeps_order_and_isolation() {
        let modules: Vec<AwwasmModule> = (1..=4)
            .map(|pages| {
                let mut module = AwwasmModule::new();
                module.add_memory(AwwasmMemoryType::new(pages, None));
                module.add_export("memory", crate::values::AwwasmExternKind::Memory, 0);
                module
            })
            .collect();

        let results = instantiate_isolated(&modules, &AwwasmConfig::default(), |_| Ok(()));
        assert_eq!(results.len(), 4);
        for (i, result) in results.iter().enumerate() {
            let (store, inst) = result.as_ref().unwrap();
            let mem = inst.export_memory("memory").unwrap();
            assert_eq!(store.mem(mem).unwrap().size_pages(), i as u32 + 1);
            assert_eq!(store.mem_count(), 1);
        }
    }

    #[test]
    fn test_setup_defines_imports_per_store() {
        let mut module = AwwasmModule::new();
        module.add_import(
            "env",
            "g",
            AwwasmImportDesc::Global(AwwasmGlobalType::immutable(AwwasmValueType::I32)),
        );
        let modules = vec![module.clone(), module];

        let results = instantiate_isolated(&modules, &AwwasmConfig::default(), |store| {
            let mut imports = AwwasmImports::new();
            imports.add_global(
                "env",
                "g",
                AwwasmGlobalInst::new(AwwasmGlobalType::immutable(AwwasmValueType::I32), AwwasmValue::I32(1))
                    .unwrap(),
            );
            store.define_imports(imports)?;
            Ok(())
        });
        assert!(results.iter().all(Result::is_ok));

        let failing = instantiate_isolated(&modules, &AwwasmConfig::default(), |_| Ok(()));
        assert!(failing
            .iter()
            .all(|r| matches!(r, Err(AwwasmInstantiationError::UnknownImport { .. }))));
    }
}
