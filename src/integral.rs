//! Summed-area table for O(1) rectangle sums.

use crate::image::ImageAccess;

/// Integral image over a grayscale source.
///
/// `table[y][x]` holds the sum of all source intensities with row <= y and
/// column <= x, so the sum over any axis-aligned rectangle comes from four
/// lookups. Built once per pyramid level and read-only afterward.
#[derive(Debug, Clone)]
pub struct IntegralImage {
    table: Vec<f64>,
    width: u32,
    height: u32,
}

impl IntegralImage {
    /// Compute the table from a pixel source. A zero-area source yields an
    /// empty table.
    pub fn compute<I: ImageAccess>(image: &I) -> Self {
        let width = image.width();
        let height = image.height();
        let mut table = vec![0.0; (width as usize) * (height as usize)];

        for y in 0..height {
            let mut row_sum = 0.0;
            for x in 0..width {
                row_sum += f64::from(image.get_pixel(x as i32, y as i32));
                let idx = (y * width + x) as usize;
                table[idx] = row_sum
                    + if y > 0 {
                        table[((y - 1) * width + x) as usize]
                    } else {
                        0.0
                    };
            }
        }

        Self {
            table,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Prefix sum at (x, y) inclusive; zero above or left of the image.
    #[inline]
    fn prefix(&self, x: i64, y: i64) -> f64 {
        if x < 0 || y < 0 {
            return 0.0;
        }
        debug_assert!(x < i64::from(self.width) && y < i64::from(self.height));
        self.table[(y * i64::from(self.width) + x) as usize]
    }

    /// Sum of intensities over the half-open rectangle `[x0, x1) x [y0, y1)`.
    /// Degenerate rectangles sum to 0.
    #[inline]
    pub fn rect_sum(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }
        debug_assert!(x1 <= self.width && y1 <= self.height);

        let x0 = i64::from(x0);
        let y0 = i64::from(y0);
        let x1 = i64::from(x1);
        let y1 = i64::from(y1);

        self.prefix(x1 - 1, y1 - 1) - self.prefix(x0 - 1, y1 - 1) - self.prefix(x1 - 1, y0 - 1)
            + self.prefix(x0 - 1, y0 - 1)
    }
}
