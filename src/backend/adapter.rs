//! Lifecycle owner of one backend session and its primary module.

use crate::backend::{
    format_version, BackendLibrary, BackendLoader, BackendModule, BackendSession, InputBuffer,
    ModuleCallback, ModuleConfig, ProcessStatus, SessionCallback,
};
use crate::config::{CompressionFormat, DecodeConfig};
use crate::error::{BackendStage, DecodeError, ProtocolError};
use crate::pipeline::InputPort;

/// Owns the library, session and module handles of a decode session.
///
/// Handles are released in reverse order by [`close`](Self::close), which is
/// safe to call at any point, including after a failed [`open`](Self::open),
/// and is also run on drop.
#[derive(Default)]
pub struct BackendAdapter {
    library: Option<Box<dyn BackendLibrary>>,
    session: Option<Box<dyn BackendSession>>,
    module: Option<Box<dyn BackendModule>>,
    running: bool,
}

impl BackendAdapter {
    /// Loads the library for `format`, opens a session, configures outputs
    /// and key/value pairs, then initializes and starts the primary decoder.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Backend`] naming the failed step. Everything
    /// acquired before the failure has been released.
    pub fn open(
        loader: &dyn BackendLoader,
        format: CompressionFormat,
        config: &DecodeConfig,
        session_callback: SessionCallback,
        module_callback: ModuleCallback,
    ) -> Result<Self, DecodeError> {
        let mut adapter = Self::default();
        if let Err(e) = adapter.bring_up(loader, format, config, session_callback, module_callback)
        {
            tracing::error!("backend open failed: {e}");
            adapter.close();
            return Err(e);
        }
        Ok(adapter)
    }

    fn bring_up(
        &mut self,
        loader: &dyn BackendLoader,
        format: CompressionFormat,
        config: &DecodeConfig,
        session_callback: SessionCallback,
        module_callback: ModuleCallback,
    ) -> Result<(), DecodeError> {
        let name = config.library_for(format);
        let library = self.library.insert(
            loader
                .load(name)
                .map_err(|e| DecodeError::backend(BackendStage::LoadLibrary, e.message()))?,
        );
        tracing::info!(
            library = library.name(),
            version = %format_version(library.version()),
            "loaded backend library"
        );

        let session = self.session.insert(
            library
                .open_session(config.session_kind, session_callback)
                .map_err(|e| DecodeError::backend(BackendStage::OpenSession, e.message()))?,
        );
        tracing::debug!(kind = ?config.session_kind, "opened backend session");

        session
            .configure_outputs(&config.outputs)
            .map_err(|e| DecodeError::backend(BackendStage::ConfigureOutputs, e.message()))?;
        for output in &config.outputs {
            tracing::info!(output = %output.id, max_channels = output.max_channels, "configured output");
        }

        if let Some(kv_pairs) = &config.kv_pairs {
            session
                .set_kv_pairs(kv_pairs)
                .map_err(|e| DecodeError::backend(BackendStage::SetKvPairs, e.message()))?;
            tracing::info!(kv_pairs = %kv_pairs, "applied backend kvpairs");
        }

        let module = self.module.insert(
            session
                .init_module(&ModuleConfig::primary_decoder(format), module_callback)
                .map_err(|e| DecodeError::backend(BackendStage::InitModule, e.message()))?,
        );

        module
            .start()
            .map_err(|e| DecodeError::backend(BackendStage::StartModule, e.message()))?;
        self.running = true;
        tracing::info!(%format, "started decoder module");

        Ok(())
    }

    /// Offers `packet[offset..]` to the primary module.
    ///
    /// Returns [`ProcessStatus::NotReady`] as backpressure, never as an
    /// error.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::ZeroConsumption`] if the module took no bytes
    /// - [`ProtocolError::OverConsumption`] if it claims more than offered
    pub fn push(
        &mut self,
        packet: &[u8],
        offset: usize,
        timestamp: Option<i64>,
    ) -> Result<ProcessStatus, DecodeError> {
        let module = self.module.as_mut().ok_or_else(|| {
            DecodeError::backend(BackendStage::InitModule, "no decoder module")
        })?;

        let remaining = &packet[offset..];
        match module.process(&InputBuffer::new(remaining, timestamp)) {
            ProcessStatus::NotReady => {
                tracing::trace!(offset, remaining = remaining.len(), "decoder not ready");
                Ok(ProcessStatus::NotReady)
            }
            ProcessStatus::Consumed(0) => Err(ProtocolError::ZeroConsumption {
                offset,
                remaining: remaining.len(),
            }
            .into()),
            ProcessStatus::Consumed(consumed) if consumed > remaining.len() => {
                Err(ProtocolError::OverConsumption {
                    consumed,
                    remaining: remaining.len(),
                }
                .into())
            }
            ProcessStatus::Consumed(consumed) => {
                tracing::trace!(offset, consumed, remaining = remaining.len(), "decoder consumed");
                Ok(ProcessStatus::Consumed(consumed))
            }
        }
    }

    /// Sends the end-of-stream marker, then stops the module.
    ///
    /// The backend confirms the drain later with a session EOS event.
    pub fn signal_end_of_stream(&mut self) -> Result<(), DecodeError> {
        let module = self.module.as_mut().ok_or_else(|| {
            DecodeError::backend(BackendStage::StopModule, "no decoder module")
        })?;

        if module.process(&InputBuffer::end_of_stream()) == ProcessStatus::NotReady {
            tracing::warn!("decoder did not accept the end-of-stream marker");
        }
        tracing::info!("sent end of stream");

        self.running = false;
        module
            .stop()
            .map_err(|e| DecodeError::backend(BackendStage::StopModule, e.message()))
    }

    /// Stops and releases the module, closes the session and unloads the
    /// library. Failures are logged; each handle is released at most once.
    pub fn close(&mut self) {
        if let Some(mut module) = self.module.take() {
            if std::mem::take(&mut self.running) {
                if let Err(e) = module.stop() {
                    tracing::warn!("module stop failed: {e}");
                }
            }
            if let Err(e) = module.release() {
                tracing::warn!("module release failed: {e}");
            }
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::warn!("session close failed: {e}");
            }
        }
        if let Some(library) = self.library.take() {
            let name = library.name().to_string();
            if let Err(e) = library.unload() {
                tracing::warn!("unloading {name} failed: {e}");
            } else {
                tracing::debug!(library = %name, "unloaded backend library");
            }
        }
    }

    /// Returns `true` while a module is open.
    pub fn is_open(&self) -> bool {
        self.module.is_some()
    }
}

impl InputPort for BackendAdapter {
    fn push(
        &mut self,
        packet: &[u8],
        offset: usize,
        timestamp: Option<i64>,
    ) -> Result<ProcessStatus, DecodeError> {
        BackendAdapter::push(self, packet, offset, timestamp)
    }

    fn signal_end_of_stream(&mut self) -> Result<(), DecodeError> {
        BackendAdapter::signal_end_of_stream(self)
    }
}

impl Drop for BackendAdapter {
    fn drop(&mut self) {
        self.close();
    }
}
