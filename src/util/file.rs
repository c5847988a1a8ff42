/* This file is part of Vesper
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{fs, path::Path};

use crate::Result;

/// Read the full contents of a file.
pub fn load_file(path: &Path) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

/// Replace the contents of a file atomically. The data is written to a
/// sibling temporary file which is then renamed over the target, so readers
/// never observe a half-written file.
pub fn save_file(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join("vesper_file_test.bin");
        save_file(&path, b"zerocash").unwrap();
        assert_eq!(load_file(&path).unwrap(), b"zerocash");
        fs::remove_file(&path).unwrap();
    }
}
