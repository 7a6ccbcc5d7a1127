//! Routing of signing outcomes back to the requesting module

use std::collections::BTreeMap;
use std::sync::Arc;

use quorum_core::{ModuleMetadata, MultiSig, RequesterModule};

use crate::context::BlockContext;
use crate::error::{ChainError, Result};

/// Capability a requesting module registers to learn how its signatures ended
pub trait SigHandler: Send + Sync {
    /// Called when a signing session reached quorum
    fn handle_completed(
        &self,
        ctx: &mut BlockContext,
        sig: &MultiSig,
        metadata: Option<&ModuleMetadata>,
    ) -> Result<()>;

    /// Called when a signing session expired without reaching quorum
    fn handle_failed(
        &self,
        ctx: &mut BlockContext,
        sig_id: u64,
        metadata: Option<&ModuleMetadata>,
    ) -> Result<()>;
}

/// Module → handler map, frozen once the keeper is built
#[derive(Default, Clone)]
pub struct SigRouter {
    handlers: BTreeMap<RequesterModule, Arc<dyn SigHandler>>,
    sealed: bool,
}

impl SigRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(
        &mut self,
        module: RequesterModule,
        handler: Arc<dyn SigHandler>,
    ) -> Result<&mut Self> {
        if self.sealed {
            return Err(ChainError::Config(
                "cannot add handler to a sealed router".to_string(),
            ));
        }
        if self.handlers.contains_key(&module) {
            return Err(ChainError::Config(format!(
                "handler for module {} already registered",
                module
            )));
        }

        self.handlers.insert(module, handler);
        Ok(self)
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn has_handler(&self, module: RequesterModule) -> bool {
        self.handlers.contains_key(&module)
    }

    /// Handler for `module`
    ///
    /// # Panics
    /// When no handler was registered. Sessions for a module can only be
    /// created once its handler exists, so this is a wiring bug.
    pub fn handler(&self, module: RequesterModule) -> &Arc<dyn SigHandler> {
        match self.handlers.get(&module) {
            Some(handler) => handler,
            None => panic!("no sig handler registered for module {}", module),
        }
    }
}

impl std::fmt::Debug for SigRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigRouter")
            .field("modules", &self.handlers.keys().collect::<Vec<_>>())
            .field("sealed", &self.sealed)
            .finish()
    }
}
