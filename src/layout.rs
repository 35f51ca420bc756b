//! Pure arithmetic for the numbered shard tree.  A `Layout` knows how
//! to turn a global allocation number into zero-padded directory
//! digits and back, and how to compose or split the
//! `<local-number><delimiter><name>` form of a cached file's name.
//! Nothing in this module touches the filesystem.
use std::path::PathBuf;

/// The fixed naming parameters of one cache tree: the per-directory
/// branching factor, the digit width it implies, and the delimiter
/// between a file's local number and its logical name.
///
/// `width` is the number of decimal digits of `max_per_dir - 1`, so a
/// fan-out of 1000 names its children `000` through `999`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Layout {
    pub max_per_dir: u64,
    pub delimiter: char,
    width: usize,
}

impl Layout {
    /// Returns the layout for `max_per_dir` children per level and
    /// `delimiter` between number and name.
    ///
    /// # Panics
    ///
    /// Panics if `max_per_dir < 2`, or if `delimiter` is a decimal
    /// digit or a path separator: any of those make leaf names
    /// unparseable.
    pub fn new(max_per_dir: u64, delimiter: char) -> Layout {
        assert!(max_per_dir >= 2, "fan-out must be at least 2");
        assert!(
            !delimiter.is_ascii_digit() && delimiter != '/' && delimiter != '\\',
            "delimiter must not be a digit or a path separator"
        );

        let mut width = 1;
        let mut top = 9;
        while top < max_per_dir - 1 {
            width += 1;
            top = top * 10 + 9;
        }

        Layout {
            max_per_dir,
            delimiter,
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Formats one shard digit, zero-padded to the fixed width.
    pub fn format_digit(&self, digit: u64) -> String {
        debug_assert!(digit < self.max_per_dir);
        format!("{:0width$}", digit, width = self.width)
    }

    /// Parses a shard directory name.  Returns `None` unless it is
    /// exactly `width` decimal digits with a value in
    /// `[0, max_per_dir)`.
    pub fn parse_digit(&self, name: &str) -> Option<u64> {
        if name.len() != self.width || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let digit: u64 = name.parse().ok()?;
        if digit < self.max_per_dir {
            Some(digit)
        } else {
            None
        }
    }

    /// How many files a tree of `depth` shard levels can hold, or
    /// `None` when `max_per_dir^(depth + 1)` exceeds `u64`, i.e., more
    /// files than any reachable allocation number.
    pub fn capacity(&self, depth: u32) -> Option<u64> {
        self.max_per_dir.checked_pow(depth + 1)
    }

    /// Splits `number` into `depth` directory digits and a local
    /// number.  Returns the relative shard directory path and the
    /// remainder in `[0, max_per_dir)`.
    pub fn shard_path(&self, mut number: u64, depth: u32) -> (PathBuf, u64) {
        let mut path = PathBuf::new();

        for level in (1..=depth).rev() {
            let factor = self.max_per_dir.pow(level);
            path.push(self.format_digit(number / factor));
            number %= factor;
        }

        (path, number)
    }

    /// Composes the on-disk name of a cached file.
    pub fn leaf_name(&self, local: u64, name: &str) -> String {
        format!("{}{}{}", self.format_digit(local), self.delimiter, name)
    }

    /// Splits a cached file's name at the first delimiter, into its
    /// digit prefix and its logical name.  `None` if the delimiter is
    /// absent; the digits are not validated here.
    pub fn split_leaf<'a>(&self, file_name: &'a str) -> Option<(&'a str, &'a str)> {
        let index = file_name.find(self.delimiter)?;
        Some((
            &file_name[..index],
            &file_name[index + self.delimiter.len_utf8()..],
        ))
    }

    /// Parses the digit prefix of a cached file's name: non-empty, all
    /// decimal digits, value in `[0, max_per_dir)`.
    pub fn parse_local(&self, digits: &str) -> Option<u64> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let local: u64 = digits.parse().ok()?;
        if local < self.max_per_dir {
            Some(local)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Layout;
    use std::path::PathBuf;

    /// The digit width is `ceil(log10(max_per_dir))`: enough digits to
    /// name the highest child, no more.
    #[test]
    fn test_width() {
        assert_eq!(Layout::new(2, '.').width(), 1);
        assert_eq!(Layout::new(3, '.').width(), 1);
        assert_eq!(Layout::new(10, '.').width(), 1);
        assert_eq!(Layout::new(11, '.').width(), 2);
        assert_eq!(Layout::new(100, '.').width(), 2);
        assert_eq!(Layout::new(1000, '.').width(), 3);
        assert_eq!(Layout::new(1001, '.').width(), 4);
    }

    /// Formatted digits parse back; anything of the wrong width, out
    /// of range, or non-numeric does not.
    #[test]
    fn test_digit_round_trip() {
        let layout = Layout::new(1000, '.');

        assert_eq!(layout.format_digit(0), "000");
        assert_eq!(layout.format_digit(999), "999");
        assert_eq!(layout.parse_digit("007"), Some(7));
        assert_eq!(layout.parse_digit("7"), None);
        assert_eq!(layout.parse_digit("0070"), None);
        assert_eq!(layout.parse_digit("abc"), None);

        let narrow = Layout::new(3, '.');
        assert_eq!(narrow.parse_digit("2"), Some(2));
        assert_eq!(narrow.parse_digit("3"), None);
    }

    /// A global number splits into base-`max_per_dir` directory digits
    /// plus a local remainder.
    #[test]
    fn test_shard_path() {
        let layout = Layout::new(3, '.');

        assert_eq!(layout.shard_path(2, 0), (PathBuf::new(), 2));
        assert_eq!(layout.shard_path(3, 1), (PathBuf::from("1"), 0));
        // 9 = 1 * 3^2 + 0 * 3 + 0: the 10th file of the 26-letter
        // scenario lands at 1/0/0.j.
        assert_eq!(layout.shard_path(9, 2), (PathBuf::from("1/0"), 0));
        assert_eq!(layout.shard_path(25, 2), (PathBuf::from("2/2"), 1));
    }

    /// Leaf names split at the *first* delimiter, so logical names may
    /// themselves contain it.
    #[test]
    fn test_leaf_names() {
        let layout = Layout::new(1000, '.');

        assert_eq!(layout.leaf_name(7, "hist.muon"), "007.hist.muon");
        assert_eq!(
            layout.split_leaf("007.hist.muon"),
            Some(("007", "hist.muon"))
        );
        assert_eq!(layout.split_leaf("no delimiter"), None);

        assert_eq!(layout.parse_local("007"), Some(7));
        assert_eq!(layout.parse_local(""), None);
        assert_eq!(layout.parse_local("x7"), None);
        assert_eq!(layout.parse_local("1000"), None);
    }

    /// Capacity saturates to `None` once the tree can hold more files
    /// than any `u64` allocation number.
    #[test]
    fn test_capacity() {
        let layout = Layout::new(3, '.');

        assert_eq!(layout.capacity(0), Some(3));
        assert_eq!(layout.capacity(1), Some(9));
        assert_eq!(layout.capacity(2), Some(27));
        assert_eq!(layout.capacity(100), None);
    }
}
