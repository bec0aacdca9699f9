// platform/windows.rs - Windows Backend
//
// Native queries (monitor DPI, virtual desktop, minimized state, window
// enumeration) go straight to Win32. The pixel pipeline itself (binding,
// rendering, snapshots) lives behind CaptureBinder so the graphics capture
// implementation can be swapped without touching the session logic.
//
// NativeSurface drives an already-created top-level window (the overlay the
// UI layer hosts) through the Surface trait.

use windows::core::{BOOL, HSTRING};
use windows::Win32::Foundation::{CloseHandle, HWND, LPARAM, POINT, RECT};
use windows::Win32::Graphics::Gdi::{
    GetMonitorInfoW, MonitorFromPoint, MONITORINFO, MONITOR_DEFAULTTONULL,
};
use windows::Win32::System::ProcessStatus::GetModuleBaseNameW;
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_VM_READ,
};
use windows::Win32::UI::HiDpi::{GetDpiForMonitor, GetDpiForWindow, MDT_EFFECTIVE_DPI};
use windows::Win32::UI::WindowsAndMessaging::{
    DestroyWindow, EnumWindows, GetClientRect, GetSystemMetrics, GetWindowLongW, GetWindowRect,
    GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible, SetWindowLongW,
    SetWindowPos, SetWindowTextW, ShowWindow, GWL_EXSTYLE, HWND_NOTOPMOST, HWND_TOPMOST,
    SET_WINDOW_POS_FLAGS, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
    SM_YVIRTUALSCREEN, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER, SW_HIDE,
    SW_SHOWNOACTIVATE, WS_EX_LAYERED, WS_EX_TRANSPARENT,
};

use log::warn;

use crate::app::{CaptureFilters, SourceId};
use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{PhysicalPoint, PhysicalRect, PhysicalSize, ScaleFactor};
use crate::magnifier::Snapshot;

use super::{process_matches, CaptureBackend, NativeHandle, NativeWindowInfo, Surface};

/// Windows below this size are helper windows (1x1 message sinks etc.)
const MIN_PICKABLE_EDGE: i32 = 10;

/// Baseline DPI for scale 1.0
const BASE_DPI: f64 = 96.0;

/// The pixel pipeline: graphics capture sessions and frame readback
pub trait CaptureBinder: Send + Sync {
    fn bind(&self, session: SourceId, target: Option<NativeHandle>, rect: PhysicalRect) -> CaptureResult<()>;
    fn resume(&self, session: SourceId) -> CaptureResult<()>;
    fn pause(&self, session: SourceId) -> CaptureResult<()>;
    fn unbind(&self, session: SourceId) -> CaptureResult<()>;
    fn resize(&self, session: SourceId, size: PhysicalSize) -> CaptureResult<()>;
    fn set_filters(&self, session: SourceId, filters: CaptureFilters) -> CaptureResult<()>;
    /// Frozen bitmap of the monitor with the given bounds
    fn snapshot(&self, monitor: PhysicalRect, scale: ScaleFactor) -> CaptureResult<Snapshot>;
}

/// CaptureBackend for Windows
pub struct WindowsBackend {
    binder: Box<dyn CaptureBinder>,
}

impl WindowsBackend {
    pub fn new(binder: Box<dyn CaptureBinder>) -> Self {
        Self { binder }
    }
}

fn hwnd(handle: NativeHandle) -> HWND {
    HWND(handle.0 as *mut _)
}

fn rect_from(rc: RECT) -> PhysicalRect {
    PhysicalRect::new(
        rc.left,
        rc.top,
        (rc.right - rc.left).max(0) as u32,
        (rc.bottom - rc.top).max(0) as u32,
    )
}

/// Monitor bounds and effective scale at a desktop point
fn monitor_from_point(point: PhysicalPoint) -> CaptureResult<(PhysicalRect, ScaleFactor)> {
    unsafe {
        let monitor = MonitorFromPoint(POINT { x: point.x, y: point.y }, MONITOR_DEFAULTTONULL);
        if monitor.is_invalid() {
            return Err(CaptureError::Backend(format!("no monitor at {:?}", point)));
        }

        let mut info = MONITORINFO {
            cbSize: std::mem::size_of::<MONITORINFO>() as u32,
            ..Default::default()
        };
        if !GetMonitorInfoW(monitor, &mut info).as_bool() {
            return Err(CaptureError::Backend("GetMonitorInfoW failed".into()));
        }

        let mut dpi_x = 0u32;
        let mut dpi_y = 0u32;
        GetDpiForMonitor(monitor, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y)
            .map_err(|e| CaptureError::ScaleResolution(e.to_string()))?;
        let scale = ScaleFactor::new(dpi_x as f64 / BASE_DPI)?;

        Ok((rect_from(info.rcMonitor), scale))
    }
}

fn process_name(window: HWND) -> Option<String> {
    unsafe {
        let mut pid = 0u32;
        GetWindowThreadProcessId(window, Some(&mut pid));
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_VM_READ, false, pid).ok()?;
        let mut buffer = [0u16; 260];
        let len = GetModuleBaseNameW(process, None, &mut buffer) as usize;
        let _ = CloseHandle(process);
        (len > 0).then(|| String::from_utf16_lossy(&buffer[..len]))
    }
}

fn window_title(window: HWND) -> String {
    let mut buffer = [0u16; 512];
    let len = unsafe { GetWindowTextW(window, &mut buffer) };
    String::from_utf16_lossy(&buffer[..len.max(0) as usize])
}

fn client_size(window: HWND) -> Option<PhysicalSize> {
    let mut rc = RECT::default();
    unsafe { GetClientRect(window, &mut rc).ok()? };
    Some(rect_from(rc).size())
}

unsafe extern "system" fn collect_window(window: HWND, lparam: LPARAM) -> BOOL {
    let found = &mut *(lparam.0 as *mut Vec<NativeWindowInfo>);
    if IsWindowVisible(window).as_bool() {
        let big_enough = client_size(window)
            .map(|s| s.width as i32 > MIN_PICKABLE_EDGE && s.height as i32 > MIN_PICKABLE_EDGE)
            .unwrap_or(false);
        if big_enough {
            if let Some(process_name) = process_name(window) {
                found.push(NativeWindowInfo {
                    handle: NativeHandle(window.0 as isize),
                    title: window_title(window),
                    process_name,
                });
            }
        }
    }
    BOOL(1)
}

impl CaptureBackend for WindowsBackend {
    fn resolve_native_target_handle(&self, process_label: &str) -> CaptureResult<NativeHandle> {
        self.list_native_windows()
            .into_iter()
            .find(|w| process_matches(process_label, w))
            .map(|w| w.handle)
            .ok_or_else(|| CaptureError::TargetNotFound(process_label.to_string()))
    }

    fn bind_capture(&self, session: SourceId, target: Option<NativeHandle>, rect: PhysicalRect) -> CaptureResult<()> {
        if let Some(handle) = target {
            if !unsafe { IsWindow(Some(hwnd(handle))) }.as_bool() {
                return Err(CaptureError::TargetNotFound(format!("{:?}", handle)));
            }
        }
        self.binder.bind(session, target, rect)
    }

    fn resume_capture(&self, session: SourceId) -> CaptureResult<()> {
        self.binder.resume(session)
    }

    fn pause_capture(&self, session: SourceId) -> CaptureResult<()> {
        self.binder.pause(session)
    }

    fn unbind_capture(&self, session: SourceId) -> CaptureResult<()> {
        self.binder.unbind(session)
    }

    fn resize_capture(&self, session: SourceId, size: PhysicalSize) -> CaptureResult<()> {
        self.binder.resize(session, size)
    }

    fn set_capture_filters(&self, session: SourceId, filters: CaptureFilters) -> CaptureResult<()> {
        self.binder.set_filters(session, filters)
    }

    fn query_monitor_scale(&self, point: PhysicalPoint) -> CaptureResult<ScaleFactor> {
        monitor_from_point(point)
            .map(|(_, scale)| scale)
            .map_err(|e| CaptureError::ScaleResolution(e.to_string()))
    }

    fn query_virtual_desktop_bounds(&self) -> CaptureResult<PhysicalRect> {
        let (x, y, w, h) = unsafe {
            (
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN),
                GetSystemMetrics(SM_CYVIRTUALSCREEN),
            )
        };
        if w <= 0 || h <= 0 {
            return Err(CaptureError::Backend("virtual desktop has no area".into()));
        }
        Ok(PhysicalRect::new(x, y, w as u32, h as u32))
    }

    fn query_monitor_bounds(&self, point: PhysicalPoint) -> CaptureResult<PhysicalRect> {
        monitor_from_point(point).map(|(bounds, _)| bounds)
    }

    fn capture_monitor_snapshot(&self, point: PhysicalPoint) -> CaptureResult<Snapshot> {
        let (bounds, scale) = monitor_from_point(point)?;
        self.binder.snapshot(bounds, scale)
    }

    fn is_native_window_minimized(&self, handle: NativeHandle) -> CaptureResult<bool> {
        unsafe {
            if !IsWindow(Some(hwnd(handle))).as_bool() {
                return Err(CaptureError::TargetNotFound(format!("{:?}", handle)));
            }
            Ok(IsIconic(hwnd(handle)).as_bool())
        }
    }

    fn query_native_window_size(&self, handle: NativeHandle) -> CaptureResult<PhysicalSize> {
        client_size(hwnd(handle)).ok_or_else(|| CaptureError::TargetNotFound(format!("{:?}", handle)))
    }

    fn list_native_windows(&self) -> Vec<NativeWindowInfo> {
        let mut found: Vec<NativeWindowInfo> = Vec::new();
        unsafe {
            let _ = EnumWindows(Some(collect_window), LPARAM(&mut found as *mut _ as isize));
        }
        found
    }
}

/// Surface over an existing top-level window
pub struct NativeSurface {
    handle: NativeHandle,
    label: String,
    destroyed: bool,
}

impl NativeSurface {
    pub fn attach(handle: NativeHandle, label: impl Into<String>) -> CaptureResult<Self> {
        let label = label.into();
        if !unsafe { IsWindow(Some(hwnd(handle))) }.as_bool() {
            return Err(CaptureError::TargetNotFound(label));
        }
        Ok(Self { handle, label, destroyed: false })
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    fn reposition(&self, insert_after: Option<HWND>, bounds: PhysicalRect, flags: SET_WINDOW_POS_FLAGS) {
        let result = unsafe {
            SetWindowPos(
                hwnd(self.handle),
                insert_after,
                bounds.x,
                bounds.y,
                bounds.width as i32,
                bounds.height as i32,
                flags | SWP_NOACTIVATE,
            )
        };
        if let Err(e) = result {
            warn!("SetWindowPos on {} failed: {}", self.label, e);
        }
    }
}

impl Surface for NativeSurface {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn inner_size(&self) -> PhysicalSize {
        client_size(hwnd(self.handle)).unwrap_or_else(|| PhysicalSize::new(0, 0))
    }

    fn scale_factor(&self) -> ScaleFactor {
        let dpi = unsafe { GetDpiForWindow(hwnd(self.handle)) };
        ScaleFactor::new(dpi as f64 / BASE_DPI).unwrap_or(ScaleFactor::IDENTITY)
    }

    fn set_inner_size(&mut self, size: PhysicalSize) {
        if self.destroyed {
            return;
        }
        let mut outer = RECT::default();
        let mut client = RECT::default();
        unsafe {
            if GetWindowRect(hwnd(self.handle), &mut outer).is_err()
                || GetClientRect(hwnd(self.handle), &mut client).is_err()
            {
                warn!("Could not read frame of {}", self.label);
                return;
            }
        }
        // Frame thickness is the outer/client difference
        let frame_w = (outer.right - outer.left) - (client.right - client.left);
        let frame_h = (outer.bottom - outer.top) - (client.bottom - client.top);
        let bounds = PhysicalRect::new(
            0,
            0,
            (size.width as i32 + frame_w).max(0) as u32,
            (size.height as i32 + frame_h).max(0) as u32,
        );
        self.reposition(None, bounds, SWP_NOMOVE | SWP_NOZORDER);
    }

    fn set_outer_bounds(&mut self, bounds: PhysicalRect) {
        if !self.destroyed {
            self.reposition(None, bounds, SWP_NOZORDER);
        }
    }

    fn show(&mut self) {
        if !self.destroyed {
            unsafe {
                let _ = ShowWindow(hwnd(self.handle), SW_SHOWNOACTIVATE);
            }
        }
    }

    fn hide(&mut self) {
        if !self.destroyed {
            unsafe {
                let _ = ShowWindow(hwnd(self.handle), SW_HIDE);
            }
        }
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(e) = unsafe { DestroyWindow(hwnd(self.handle)) } {
            warn!("DestroyWindow on {} failed: {}", self.label, e);
        }
    }

    fn set_notice(&mut self, notice: Option<&str>) {
        if self.destroyed {
            return;
        }
        let title = match notice {
            Some(text) => format!("{} - {}", self.label, text),
            None => self.label.clone(),
        };
        if let Err(e) = unsafe { SetWindowTextW(hwnd(self.handle), &HSTRING::from(title)) } {
            warn!("SetWindowTextW on {} failed: {}", self.label, e);
        }
    }

    fn set_pinned(&mut self, pinned: bool) {
        if self.destroyed {
            return;
        }
        let insert_after = if pinned { HWND_TOPMOST } else { HWND_NOTOPMOST };
        self.reposition(Some(insert_after), PhysicalRect::new(0, 0, 0, 0), SWP_NOMOVE | SWP_NOSIZE);
    }

    fn set_click_through(&mut self, enabled: bool) {
        if self.destroyed {
            return;
        }
        let mask = (WS_EX_TRANSPARENT | WS_EX_LAYERED).0 as i32;
        unsafe {
            let style = GetWindowLongW(hwnd(self.handle), GWL_EXSTYLE);
            let style = if enabled { style | mask } else { style & !mask };
            SetWindowLongW(hwnd(self.handle), GWL_EXSTYLE, style);
        }
    }
}
