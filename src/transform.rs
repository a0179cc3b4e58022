//! Mapping between the host's virtual resolution and the physical client
//! area of the on-screen window.
//!
//! All functions here are pure: they take the current virtual resolution and
//! a pre-fetched physical client rectangle and compute the scaled result.
//! Nothing is cached, so a transform always reflects the latest resolution
//! notification.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Rect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rect {
            left: x,
            top: y,
            right: x + width,
            bottom: y + height,
        }
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub const fn origin(&self) -> Point {
        Point::new(self.left, self.top)
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left && p.x < self.right && p.y >= self.top && p.y < self.bottom
    }
}

#[cfg(windows)]
impl From<windows::Win32::Foundation::RECT> for Rect {
    fn from(r: windows::Win32::Foundation::RECT) -> Self {
        Rect::new(r.left, r.top, r.right, r.bottom)
    }
}

#[cfg(windows)]
impl From<Rect> for windows::Win32::Foundation::RECT {
    fn from(r: Rect) -> Self {
        windows::Win32::Foundation::RECT {
            left: r.left,
            top: r.top,
            right: r.right,
            bottom: r.bottom,
        }
    }
}

/// Horizontal and vertical scale between virtual and physical space.
///
/// Returns `None` when either side has a non-positive dimension, which
/// happens while the window is minimized or before the first resolution
/// notification arrived.
pub fn scale_ratio(
    virtual_width: i32,
    virtual_height: i32,
    client: Rect,
) -> Option<(f64, f64)> {
    if virtual_width <= 0 || virtual_height <= 0 {
        return None;
    }
    if client.width() <= 0 || client.height() <= 0 {
        return None;
    }
    Some((
        client.width() as f64 / virtual_width as f64,
        client.height() as f64 / virtual_height as f64,
    ))
}

/// Maps a point in physical client coordinates into virtual coordinates.
pub fn physical_to_virtual(
    virtual_width: i32,
    virtual_height: i32,
    client: Rect,
    p: Point,
) -> Option<Point> {
    let (sx, sy) = scale_ratio(virtual_width, virtual_height, client)?;
    Some(Point::new(
        ((p.x - client.left) as f64 / sx).round() as i32,
        ((p.y - client.top) as f64 / sy).round() as i32,
    ))
}

/// Maps a point in virtual coordinates into physical client coordinates.
pub fn virtual_to_physical(
    virtual_width: i32,
    virtual_height: i32,
    client: Rect,
    p: Point,
) -> Option<Point> {
    let (sx, sy) = scale_ratio(virtual_width, virtual_height, client)?;
    Some(Point::new(
        (p.x as f64 * sx).round() as i32 + client.left,
        (p.y as f64 * sy).round() as i32 + client.top,
    ))
}

/// Rect variant of [`physical_to_virtual`], taking a pre-fetched client rect
/// plus the client area's screen offset. Used when many rects are converted
/// in one frame, e.g. while repositioning secondary windows.
pub fn physical_rect_to_virtual(
    virtual_width: i32,
    virtual_height: i32,
    client: Rect,
    screen_offset: Point,
    r: Rect,
) -> Option<Rect> {
    let tl = physical_to_virtual(
        virtual_width,
        virtual_height,
        client,
        Point::new(r.left - screen_offset.x, r.top - screen_offset.y),
    )?;
    let br = physical_to_virtual(
        virtual_width,
        virtual_height,
        client,
        Point::new(r.right - screen_offset.x, r.bottom - screen_offset.y),
    )?;
    Some(Rect::new(tl.x, tl.y, br.x, br.y))
}

/// Rect variant of [`virtual_to_physical`].
pub fn virtual_rect_to_physical(
    virtual_width: i32,
    virtual_height: i32,
    client: Rect,
    screen_offset: Point,
    r: Rect,
) -> Option<Rect> {
    let tl = virtual_to_physical(virtual_width, virtual_height, client, r.origin())?;
    let br = virtual_to_physical(
        virtual_width,
        virtual_height,
        client,
        Point::new(r.right, r.bottom),
    )?;
    Some(Rect::new(
        tl.x + screen_offset.x,
        tl.y + screen_offset.y,
        br.x + screen_offset.x,
        br.y + screen_offset.y,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_dimensions() {
        let client = Rect::from_size(0, 0, 800, 600);
        assert!(physical_to_virtual(0, 600, client, Point::new(1, 1)).is_none());
        assert!(physical_to_virtual(800, -1, client, Point::new(1, 1)).is_none());
        let empty = Rect::from_size(0, 0, 0, 600);
        assert!(physical_to_virtual(800, 600, empty, Point::new(1, 1)).is_none());
    }

    #[test]
    fn identity_when_scales_match() {
        let client = Rect::from_size(0, 0, 1280, 720);
        let p = Point::new(640, 360);
        assert_eq!(
            physical_to_virtual(1280, 720, client, p),
            Some(Point::new(640, 360))
        );
        assert_eq!(
            virtual_to_physical(1280, 720, client, p),
            Some(Point::new(640, 360))
        );
    }

    #[test]
    fn client_offset_is_honored() {
        let client = Rect::from_size(100, 50, 1280, 720);
        let p = physical_to_virtual(1280, 720, client, Point::new(100, 50)).unwrap();
        assert_eq!(p, Point::new(0, 0));
        let back = virtual_to_physical(1280, 720, client, p).unwrap();
        assert_eq!(back, Point::new(100, 50));
    }

    #[test]
    fn round_trip_within_one_unit() {
        // A spread of scale ratios, including non-integer ones.
        let cases = [
            (640, 480, Rect::from_size(0, 0, 1920, 1080)),
            (1280, 720, Rect::from_size(10, 20, 2560, 1440)),
            (1920, 1080, Rect::from_size(0, 0, 1366, 768)),
            (800, 600, Rect::from_size(-1920, 0, 1024, 768)),
        ];
        for (vw, vh, client) in cases {
            for p in [
                Point::new(0, 0),
                Point::new(vw / 3, vh / 3),
                Point::new(vw - 1, vh - 1),
                Point::new(vw / 7 * 5, vh / 11 * 9),
            ] {
                let phys = virtual_to_physical(vw, vh, client, p).unwrap();
                let round = physical_to_virtual(vw, vh, client, phys).unwrap();
                assert!(
                    (round.x - p.x).abs() <= 1 && (round.y - p.y).abs() <= 1,
                    "{:?} -> {:?} -> {:?} (virtual {}x{}, client {:?})",
                    p,
                    phys,
                    round,
                    vw,
                    vh,
                    client
                );
            }
        }
    }

    #[test]
    fn rect_variant_applies_screen_offset() {
        let client = Rect::from_size(0, 0, 1920, 1080);
        let offset = Point::new(200, 100);
        let virt = Rect::from_size(0, 0, 960, 540);
        let phys =
            virtual_rect_to_physical(960, 540, client, offset, virt).unwrap();
        assert_eq!(phys, Rect::new(200, 100, 2120, 1180));
        let back =
            physical_rect_to_virtual(960, 540, client, offset, phys).unwrap();
        assert_eq!(back, virt);
    }
}
