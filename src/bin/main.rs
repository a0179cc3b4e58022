/*!
# DLL injector

Companion loader for the virtualization DLL: finds the target process by
executable name, writes the DLL path into its address space and starts a
remote `LoadLibraryA` thread pointing at it.

Usage: `vdisplay_inject <process-name> [dll-path]`. The DLL path defaults
to `vdisplay_hook.dll` next to the current directory. Administrator rights
may be required depending on the target.
*/

#[cfg(windows)]
fn main() {
    let mut args = std::env::args().skip(1);
    let Some(target) = args.next() else {
        eprintln!("usage: vdisplay_inject <process-name> [dll-path]");
        std::process::exit(2);
    };
    let dll_path = match args.next() {
        Some(path) => std::path::PathBuf::from(path),
        None => std::env::current_dir()
            .unwrap_or_default()
            .join("vdisplay_hook.dll"),
    };

    if let Err(e) = windows_impl::run(&target, &dll_path) {
        eprintln!("injection failed: {e}");
        std::process::exit(1);
    }
    println!("injected {} into {target}", dll_path.display());
}

#[cfg(not(windows))]
fn main() {
    eprintln!("vdisplay_inject only runs on Windows");
    std::process::exit(1);
}

#[cfg(windows)]
mod windows_impl {
    use std::ffi::CString;
    use std::path::Path;
    use std::ptr::null_mut;

    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
    use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
    use windows::Win32::System::Memory::{
        VirtualAllocEx, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows::Win32::System::Threading::{
        CreateRemoteThread, OpenProcess, PROCESS_ALL_ACCESS,
    };
    use windows::core::s;

    pub fn run(target: &str, dll_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if !dll_path.is_file() {
            return Err(format!("DLL not found: {}", dll_path.display()).into());
        }
        let dll_path_c = CString::new(dll_path.to_string_lossy().into_owned())?;
        let alloc_size = dll_path_c.as_bytes_with_nul().len();

        let process_id =
            find_process_id(target).ok_or_else(|| format!("process not found: {target}"))?;

        unsafe {
            let process = OpenProcess(PROCESS_ALL_ACCESS, false, process_id)?;
            let result = inject(process, &dll_path_c, alloc_size);
            CloseHandle(process)?;
            result?;
        }
        Ok(())
    }

    unsafe fn inject(
        process: HANDLE,
        dll_path_c: &CString,
        alloc_size: usize,
    ) -> windows::core::Result<()> {
        let remote_mem = VirtualAllocEx(
            process,
            Some(null_mut()),
            alloc_size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if remote_mem.is_null() {
            return Err(windows::core::Error::from_win32());
        }

        WriteProcessMemory(
            process,
            remote_mem,
            dll_path_c.as_ptr() as *const _,
            alloc_size,
            None,
        )?;

        let kernel32 = GetModuleHandleA(s!("kernel32.dll"))?;
        let load_library =
            GetProcAddress(kernel32, s!("LoadLibraryA")).ok_or_else(windows::core::Error::from_win32)?;
        let load_library_fn: unsafe extern "system" fn(*mut std::ffi::c_void) -> u32 =
            std::mem::transmute(load_library);

        let thread = CreateRemoteThread(
            process,
            Some(null_mut()),
            0,
            Some(load_library_fn),
            Some(remote_mem),
            0,
            Some(null_mut()),
        )?;
        CloseHandle(thread)?;
        Ok(())
    }

    fn find_process_id(name: &str) -> Option<u32> {
        use sysinfo::System;
        let mut sys = System::new_all();
        sys.refresh_all();

        sys.processes().iter().find_map(|(pid, process)| {
            process
                .name()
                .to_string_lossy()
                .eq_ignore_ascii_case(name)
                .then(|| pid.as_u32())
        })
    }
}
