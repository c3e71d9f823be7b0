use alloc::vec::Vec;

use crate::layout::dir_entry::NAME_MAX_LEN;
use crate::{Error, Result};

pub trait Path {
    /// 返回自根目录起、不包含相对项的各级名字。
    ///
    /// 相对路径同样从根目录起算；空的分量被忽略；
    /// 越过根目录的`..`视为非法参数。
    fn components(&self) -> Result<Vec<&str>>;

    /// 返回路径的`(父目录各级名字, 文件名)`，根目录没有文件名。
    fn parent_file(&self) -> Result<(Vec<&str>, &str)>;
}

impl Path for str {
    fn components(&self) -> Result<Vec<&str>> {
        let mut cmps = Vec::new();

        for cmp in self.split('/') {
            match cmp {
                "" | "." => (),
                ".." => {
                    cmps.pop().ok_or(Error::InvalidArgument)?;
                }
                name => {
                    check_name(name)?;
                    cmps.push(name);
                }
            }
        }

        Ok(cmps)
    }

    fn parent_file(&self) -> Result<(Vec<&str>, &str)> {
        let mut cmps = self.components()?;
        let name = cmps.pop().ok_or(Error::InvalidArgument)?;
        Ok((cmps, name))
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.len() > NAME_MAX_LEN || name.contains('\0') {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec;

    use super::*;

    #[test]
    fn components_fold_relative_items() {
        assert_eq!("/".components(), Ok(vec![]));
        assert_eq!("".components(), Ok(vec![]));
        assert_eq!("/docs//a/./b/../c/".components(), Ok(vec!["docs", "a", "c"]));
        // 相对路径同样从根目录起算
        assert_eq!("docs/a".components(), "/docs/a".components());
    }

    #[test]
    fn climbing_above_root_is_rejected() {
        assert_eq!("/..".components(), Err(Error::InvalidArgument));
        assert_eq!("/a/../../b".components(), Err(Error::InvalidArgument));
    }

    #[test]
    fn names_are_checked() {
        let long = String::from("/") + &"x".repeat(NAME_MAX_LEN + 1);
        assert_eq!(long.components(), Err(Error::InvalidArgument));
        assert_eq!("/a\0b".components(), Err(Error::InvalidArgument));
        assert!("x".repeat(NAME_MAX_LEN).components().is_ok());
    }

    #[test]
    fn parent_file_splits_last_component() {
        assert_eq!("/docs/readme".parent_file(), Ok((vec!["docs"], "readme")));
        assert_eq!("/readme".parent_file(), Ok((vec![], "readme")));
        assert_eq!("/docs/..".parent_file(), Err(Error::InvalidArgument));
        assert_eq!("/".parent_file(), Err(Error::InvalidArgument));
    }
}
