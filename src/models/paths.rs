use crate::models::error::SError;
use camino::{Utf8Path, Utf8PathBuf};

macro_rules! define_paths {
    ($name:ident { $($field:ident : $default:expr),* $(,)? }) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            $(pub $field: Utf8PathBuf,)*
        }

        impl $name {
            pub fn to_absolute(mut self, base: &Utf8Path) -> Self {
                $(self.$field = base.join(self.$field);)*
                self
            }

            pub fn new(base: &Utf8Path) -> Self {
                Self::default().to_absolute(base)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $($field: $default.into(),)*
                }
            }
        }
    };
}

pub const GAME_FOLDER: &str = "SparkingZERO";

define_paths!(GamePathRules {
    paks_mods: "SparkingZERO/Content/Paks/~mods",
    logic_mods: "SparkingZERO/Content/Paks/LogicMods",
    movies: "SparkingZERO/Content/Movies",
    binaries: "SparkingZERO/Binaries/Win64",
    loader_mods: "SparkingZERO/Binaries/Win64/Mods",
    loader_manifest: "SparkingZERO/Binaries/Win64/Mods/mods.txt",
    game_exe: "SparkingZERO.exe",
    shipping_exe: "SparkingZERO/Binaries/Win64/SparkingZERO-Win64-Shipping.exe",
});

define_paths!(LibPathRules {
    mods: "Mods",
    registry: "mods.json",
    downloads: "downloads",
    settings: "settings.json",
    logs: "logs",
});

impl GamePathRules {
    /// Builds the absolute layout from whatever the user pointed us at:
    /// the install root, the `SparkingZERO` folder, `Binaries/Win64`, or
    /// one of the executables.
    pub fn resolve(game_path: &Utf8Path) -> Result<Self, SError> {
        if game_path.as_str().trim().is_empty() {
            return Err(SError::GamePathNotConfigured);
        }

        Ok(Self::new(&resolve_game_root(game_path)))
    }
}

pub fn resolve_game_root(game_path: &Utf8Path) -> Utf8PathBuf {
    let mut root = if game_path.is_file() || game_path.extension() == Some("exe") {
        game_path.parent().unwrap_or(game_path).to_path_buf()
    } else {
        game_path.to_path_buf()
    };

    if root.ends_with("Binaries/Win64") {
        for _ in 0..3 {
            if let Some(parent) = root.parent() {
                root = parent.to_path_buf();
            }
        }
    } else if root.file_name() == Some(GAME_FOLDER) {
        if let Some(parent) = root.parent() {
            root = parent.to_path_buf();
        }
    }

    root
}
