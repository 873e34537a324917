/// シーン内の切り出し範囲（半開区間）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl Window {
    /// 中心 (row, col)、半径 `half` のウィンドウ
    ///
    /// `[row-half, row+half) x [col-half, col+half)` がシーン外にはみ出す場合は `None`。
    pub fn centered(row: i64, col: i64, half: usize, rows: usize, cols: usize) -> Option<Self> {
        let half = half as i64;
        let (row_start, row_end) = (row - half, row + half);
        let (col_start, col_end) = (col - half, col + half);

        if row_start < 0 || col_start < 0 || row_end > rows as i64 || col_end > cols as i64 {
            return None;
        }

        Some(Self {
            row_start: row_start as usize,
            row_end: row_end as usize,
            col_start: col_start as usize,
            col_end: col_end as usize,
        })
    }

    /// 点 (row, col) がウィンドウ中心から縦横ともに `half` 未満の距離にあるか
    pub fn near_center(center_row: i64, center_col: i64, row: i64, col: i64, half: usize) -> bool {
        let half = half as i64;
        (row - center_row).abs() < half && (col - center_col).abs() < half
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_inside() {
        let w = Window::centered(256, 256, 128, 512, 512).unwrap();
        assert_eq!((w.row_start, w.row_end), (128, 384));
        assert_eq!((w.col_start, w.col_end), (128, 384));
    }

    #[test]
    fn test_centered_edges() {
        assert!(Window::centered(128, 128, 128, 256, 256).is_some());
        assert!(Window::centered(127, 128, 128, 256, 256).is_none());
        assert!(Window::centered(129, 128, 128, 256, 256).is_none());
        assert!(Window::centered(-5, 300, 128, 1000, 1000).is_none());
    }

    #[test]
    fn test_near_center_is_strict() {
        assert!(Window::near_center(100, 100, 227, 100, 128));
        assert!(!Window::near_center(100, 100, 228, 100, 128));
        assert!(!Window::near_center(100, 100, 100, 228, 128));
        assert!(Window::near_center(100, 100, -27, -27, 128));
    }
}
