//! POSIX process groups and signals.

use std::io;

use tokio::process::{Child, Command};

/// Puts the child in a fresh process group led by itself, so signals sent to
/// the group reach everything the shell spawns.
pub(super) fn isolate(command: &mut Command) {
    unsafe {
        command.pre_exec(|| {
            if libc::setpgid(0, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Handle to the process group of a supervised command.
#[derive(Debug)]
pub struct ProcessGroup {
    pgid: libc::pid_t,
}

impl ProcessGroup {
    /// Resolves the group of a just-spawned child.
    pub fn attach(child: &Child) -> io::Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "child already reaped"))?;
        Ok(Self {
            pgid: pid as libc::pid_t,
        })
    }

    pub fn id(&self) -> u32 {
        self.pgid as u32
    }

    /// Sends SIGTERM to the whole group.
    pub async fn terminate(&self) -> io::Result<()> {
        self.signal(libc::SIGTERM)
    }

    /// Sends SIGKILL to the whole group.
    pub async fn kill(&self) -> io::Result<()> {
        self.signal(libc::SIGKILL)
    }

    fn signal(&self, signal: libc::c_int) -> io::Result<()> {
        let rc = unsafe { libc::killpg(self.pgid, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        // The group is already gone, which is what we wanted.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }
}
