use liverpool_shader::GuestMemory;

use crate::backend::HostBackend;

/// Host and guest memory for one cache operation.
pub struct GraphicContext<'a> {
    pub backend: &'a mut dyn HostBackend,
    pub guest: &'a dyn GuestMemory,
}

impl<'a> GraphicContext<'a> {
    pub fn new(backend: &'a mut dyn HostBackend, guest: &'a dyn GuestMemory) -> Self {
        Self { backend, guest }
    }
}
