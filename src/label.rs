// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/label.rs - 类别表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

/// 默认类别：0 = 龋齿，1 = 正常
pub const DEFAULT_CLASSES: [&str; 2] = ["cavity", "normal"];

/// 有序类别名称表，`class_id` 为其下标。进程启动时加载，之后只读。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRegistry {
  names: Vec<String>,
}

impl Default for ClassRegistry {
  fn default() -> Self {
    Self::new(DEFAULT_CLASSES)
  }
}

impl ClassRegistry {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(class_id as usize).map(String::as_str)
  }

  /// 越界的类别使用 `class_<id>` 作为名称
  pub fn to_label_str(&self, class_id: u32) -> String {
    match self.get(class_id) {
      Some(name) => name.to_string(),
      None => format!("class_{}", class_id),
    }
  }
}
