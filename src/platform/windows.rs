//! Windows job objects and `taskkill`.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
    SetInformationJobObject, TerminateJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};

const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
const CREATE_NO_WINDOW: u32 = 0x08000000;

// Matches the SIGKILL-derived code so exit classification is the same on every OS.
const KILLED_EXIT_CODE: u32 = 137;

pub(super) fn isolate(command: &mut Command) {
    command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

/// A supervised process together with the job object holding its subtree.
#[derive(Debug)]
pub struct ProcessGroup {
    pid: u32,
    job: HANDLE,
}

// The job handle is a kernel handle; it is valid from any thread.
unsafe impl Send for ProcessGroup {}
unsafe impl Sync for ProcessGroup {}

impl ProcessGroup {
    /// Creates a job object and assigns the just-spawned child to it.
    pub fn attach(child: &Child) -> io::Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "child already reaped"))?;
        let process = child
            .raw_handle()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "child already reaped"))?;

        unsafe {
            let job = CreateJobObjectW(std::ptr::null(), std::ptr::null());
            if job == 0 {
                return Err(io::Error::last_os_error());
            }
            let group = Self { pid, job };

            let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
            limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
            let ok = SetInformationJobObject(
                job,
                JobObjectExtendedLimitInformation,
                &limits as *const _ as *const std::ffi::c_void,
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            );
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
            if AssignProcessToJobObject(job, process as HANDLE) == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(group)
        }
    }

    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Asks the process tree to close via `taskkill /T`.
    pub async fn terminate(&self) -> io::Result<()> {
        let status = taskkill(&["/T"], self.pid).await?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("taskkill exited with {}", status)))
        }
    }

    /// Terminates every process in the job.
    pub async fn kill(&self) -> io::Result<()> {
        if unsafe { TerminateJobObject(self.job, KILLED_EXIT_CODE) } != 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        let status = taskkill(&["/F", "/T"], self.pid).await?;
        if status.success() {
            Ok(())
        } else {
            Err(err)
        }
    }
}

async fn taskkill(flags: &[&str], pid: u32) -> io::Result<ExitStatus> {
    Command::new("taskkill")
        .args(flags)
        .args(["/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()
        .await
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.job);
        }
    }
}
