//! Windows pseudo console (ConPTY) backend
//!
//! Requires Windows 10 1809 or later.
//!
//! Reference: https://learn.microsoft.com/en-us/windows/console/creating-a-pseudoconsole-session

use std::alloc::{self, Layout};
use std::ffi::{c_void, OsStr};
use std::fs::File;
use std::io;
use std::iter;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsHandle, AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr;
use std::time::Duration;

use log::debug;
use windows_sys::Win32::Foundation::{HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, GetConsoleMode, GetConsoleScreenBufferInfo,
    ResizePseudoConsole, SetConsoleMode, CONSOLE_SCREEN_BUFFER_INFO, COORD,
    ENABLE_VIRTUAL_TERMINAL_PROCESSING, HPCON,
};
use windows_sys::Win32::System::Diagnostics::Debug::{
    FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
};
use windows_sys::Win32::System::Pipes::CreatePipe;
use windows_sys::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, UpdateProcThreadAttribute, WaitForSingleObject,
    EXTENDED_STARTUPINFO_PRESENT, INFINITE, LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION,
    PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE, STARTUPINFOEXW,
};

use super::{ChildProcess, PipePair, PipeRole, PseudoConsole, PtySystem, WindowSize};
use crate::error::{Error, ErrorKind, Result};

/// MAKELANGID(LANG_NEUTRAL, SUBLANG_DEFAULT)
const LANG_USER_DEFAULT: u32 = 0x0400;

/// ConPTY implementation of [`PtySystem`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ConPtySystem;

impl ConPtySystem {
    pub fn new() -> Self {
        Self
    }

    /// Turn on escape sequence processing for the host console output so the
    /// relayed bytes render instead of printing literally.
    pub fn enable_virtual_terminal(&self) -> Result<()> {
        debug!("Getting console mode and enabling VT processing");
        let handle = io::stdout().as_raw_handle() as HANDLE;

        let mut mode = 0;
        if unsafe { GetConsoleMode(handle, &mut mode) } == 0 {
            return Err(Error::last_os(
                ErrorKind::EnvironmentQuery,
                "Unable to get console stdout mode",
            ));
        }
        if unsafe { SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING) } == 0 {
            return Err(Error::last_os(
                ErrorKind::EnvironmentQuery,
                "Unable to set console stdout mode",
            ));
        }
        Ok(())
    }
}

impl PtySystem for ConPtySystem {
    type Pipe = File;
    type Console = ConPty;
    type Attributes = AttributeList;
    type Child = ConPtyChild;
    type Output = File;

    fn window_size(&self) -> Result<WindowSize> {
        debug!("Getting console screen buffer info");
        let handle = io::stdout().as_raw_handle() as HANDLE;

        let mut info: CONSOLE_SCREEN_BUFFER_INFO = unsafe { mem::zeroed() };
        if unsafe { GetConsoleScreenBufferInfo(handle, &mut info) } == 0 {
            return Err(Error::last_os(
                ErrorKind::EnvironmentQuery,
                "Unable to get console screen buffer info",
            ));
        }

        let window = info.srWindow;
        let size = WindowSize::from_window_rect(window.Left, window.Top, window.Right, window.Bottom)
            .ok_or_else(|| {
                Error::bare(
                    ErrorKind::EnvironmentQuery,
                    "Console window reports an empty visible area",
                )
            })?;
        debug!("Console size {}", size);
        Ok(size)
    }

    fn create_pipe(&self, role: PipeRole) -> Result<PipePair<File>> {
        debug!("Creating {} pipe", role);
        let mut read: HANDLE = ptr::null_mut();
        let mut write: HANDLE = ptr::null_mut();

        if unsafe { CreatePipe(&mut read, &mut write, ptr::null(), 0) } == 0 {
            return Err(Error::last_os(
                ErrorKind::ResourceCreation,
                "Unable to create pipes",
            ));
        }

        // SAFETY: CreatePipe succeeded, so both handles are open and ours
        let (read, write) = unsafe { (owned_handle(read), owned_handle(write)) };
        Ok(PipePair {
            read: File::from(read),
            write: File::from(write),
        })
    }

    fn create_console(&self, size: WindowSize, input: &File, output: &File) -> Result<ConPty> {
        debug!("Creating ConPTY ({})", size);
        let mut handle: HPCON = unsafe { mem::zeroed() };

        let hr = unsafe {
            CreatePseudoConsole(
                to_coord(size),
                input.as_raw_handle() as HANDLE,
                output.as_raw_handle() as HANDLE,
                0,
                &mut handle,
            )
        };
        if hr < 0 {
            return Err(Error::with_source(
                ErrorKind::PtyCreation,
                "Unable to create ConPTY",
                io::Error::from_raw_os_error(hr),
            ));
        }

        Ok(ConPty { handle })
    }

    fn build_attributes(&self, console: &ConPty) -> Result<AttributeList> {
        debug!("Initializing ConPTY STARTUPINFOEX");
        let mut size: usize = 0;

        // Sizing query: always reports ERROR_INSUFFICIENT_BUFFER
        unsafe { InitializeProcThreadAttributeList(ptr::null_mut(), 1, 0, &mut size) };

        let mut list = AttributeList::allocate(size)?;

        if unsafe { InitializeProcThreadAttributeList(list.as_ptr(), 1, 0, &mut size) } == 0 {
            return Err(Error::last_os(
                ErrorKind::AttributeList,
                "Unable to initialize STARTUPINFOEX attribute list",
            ));
        }
        list.initialized = true;

        let updated = unsafe {
            UpdateProcThreadAttribute(
                list.as_ptr(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE as usize,
                console.handle as *const c_void,
                mem::size_of::<HPCON>(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        if updated == 0 {
            return Err(Error::last_os(
                ErrorKind::AttributeList,
                "Unable to set STARTUPINFOEX attribute list to specified ConPTY",
            ));
        }

        Ok(list)
    }

    fn spawn(&self, command_line: &str, attributes: &AttributeList) -> Result<ConPtyChild> {
        let program = command_line.split(' ').next().unwrap_or(command_line);
        debug!("Creating {} process", program);

        // CreateProcessW may write into the command line buffer
        let mut command: Vec<u16> = OsStr::new(command_line)
            .encode_wide()
            .chain(iter::once(0))
            .collect();

        let mut startup: STARTUPINFOEXW = unsafe { mem::zeroed() };
        startup.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;
        startup.lpAttributeList = attributes.as_ptr();

        let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };
        let created = unsafe {
            CreateProcessW(
                ptr::null(),
                command.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                EXTENDED_STARTUPINFO_PRESENT,
                ptr::null(),
                ptr::null(),
                &startup.StartupInfo,
                &mut info,
            )
        };
        if created == 0 {
            return Err(Error::last_os(
                ErrorKind::ProcessSpawn,
                format!("Unable to create {} process", program),
            ));
        }

        // SAFETY: CreateProcessW succeeded and handed us both handles
        let (process, thread) = unsafe { (owned_handle(info.hProcess), owned_handle(info.hThread)) };
        Ok(ConPtyChild {
            process,
            _thread: thread,
            pid: info.dwProcessId,
        })
    }

    fn host_output(&self) -> Result<File> {
        // A duplicate of the std handle, written with WriteFile, so bytes are
        // not re-encoded by the console writer in std
        let handle = io::stdout().as_handle().try_clone_to_owned().map_err(|e| {
            Error::with_source(
                ErrorKind::ResourceCreation,
                "Unable to duplicate console output handle",
                e,
            )
        })?;
        Ok(File::from(handle))
    }
}

/// An open pseudo console; closed on drop
pub struct ConPty {
    handle: HPCON,
}

impl PseudoConsole for ConPty {
    fn resize(&self, size: WindowSize) -> Result<()> {
        let hr = unsafe { ResizePseudoConsole(self.handle, to_coord(size)) };
        if hr < 0 {
            return Err(Error::with_source(
                ErrorKind::PtyCreation,
                "Unable to resize ConPTY",
                io::Error::from_raw_os_error(hr),
            ));
        }
        Ok(())
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        debug!("Closing ConPTY, ConHost and attached clients");
        unsafe { ClosePseudoConsole(self.handle) };
    }
}

/// Heap buffer holding an initialized process attribute list
pub struct AttributeList {
    ptr: *mut u8,
    layout: Layout,
    initialized: bool,
}

impl AttributeList {
    fn allocate(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, mem::align_of::<usize>())
            .ok()
            .filter(|layout| layout.size() > 0)
            .ok_or_else(|| {
                Error::bare(
                    ErrorKind::AttributeList,
                    "Unable to size STARTUPINFOEX attribute list",
                )
            })?;

        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(Error::bare(
                ErrorKind::AttributeList,
                "Unable to initialize STARTUPINFOEX attribute list",
            ));
        }

        Ok(Self {
            ptr,
            layout,
            initialized: false,
        })
    }

    fn as_ptr(&self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.ptr as LPPROC_THREAD_ATTRIBUTE_LIST
    }
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        if self.initialized {
            unsafe { DeleteProcThreadAttributeList(self.as_ptr()) };
        }
        unsafe { alloc::dealloc(self.ptr, self.layout) };
    }
}

/// Child process spawned into a pseudo console
pub struct ConPtyChild {
    process: OwnedHandle,
    _thread: OwnedHandle,
    pid: u32,
}

impl ChildProcess for ConPtyChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn wait_timeout(&mut self, timeout: Option<Duration>) -> Result<Option<u32>> {
        let millis = match timeout {
            Some(timeout) => u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1),
            None => INFINITE,
        };
        let handle = self.process.as_raw_handle() as HANDLE;

        match unsafe { WaitForSingleObject(handle, millis) } {
            WAIT_OBJECT_0 => {}
            WAIT_TIMEOUT => return Ok(None),
            _ => {
                return Err(Error::last_os(
                    ErrorKind::ProcessWait,
                    "Unable to wait for child process",
                ))
            }
        }

        let mut code = 0u32;
        if unsafe { GetExitCodeProcess(handle, &mut code) } == 0 {
            return Err(Error::last_os(
                ErrorKind::ProcessWait,
                "Unable to get child exit code",
            ));
        }
        Ok(Some(code))
    }
}

/// System text for an OS error code, as `FormatMessageW` renders it
pub fn format_system_message(code: i32) -> Option<String> {
    let mut buf = [0u16; 512];
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            ptr::null(),
            code as u32,
            LANG_USER_DEFAULT,
            buf.as_mut_ptr(),
            buf.len() as u32,
            ptr::null(),
        )
    };
    if len == 0 {
        return None;
    }

    let text = String::from_utf16_lossy(&buf[..len as usize]);
    Some(text.trim_end().to_string())
}

unsafe fn owned_handle(handle: HANDLE) -> OwnedHandle {
    OwnedHandle::from_raw_handle(handle as RawHandle)
}

fn to_coord(size: WindowSize) -> COORD {
    COORD {
        X: i16::try_from(size.cols).unwrap_or(i16::MAX),
        Y: i16::try_from(size.rows).unwrap_or(i16::MAX),
    }
}
