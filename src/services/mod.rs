pub mod browser;
pub mod console;
pub mod directory;
pub mod dispatcher;
pub mod file;
pub mod security;

pub(crate) use browser::BrowserLauncher;
pub(crate) use console::{Console, PasswordInput};
pub(crate) use directory::DirectoryResource;
pub(crate) use dispatcher::ResourceDispatcher;
pub(crate) use file::FileResource;
pub(crate) use security::SecurityGate;
