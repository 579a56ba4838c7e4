// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

macro_rules! box_database {
    ($($(#[$attr:meta])* $boxenum:ident $boxtype:expr),*,) => {
        /// Box types this crate knows how to dispatch on.
        ///
        /// Anything else is carried as `UnknownBox` with its raw tag so it can be
        /// logged and skipped.
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub enum BoxType {
            $($(#[$attr])* $boxenum),*,
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> Self {
                use self::BoxType::*;
                match t {
                    $($boxtype => $boxenum),*,
                    _ => UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(b: BoxType) -> u32 {
                use self::BoxType::*;
                match b {
                    $($boxenum => $boxtype),*,
                    UnknownBox(t) => t,
                }
            }
        }
    }
}

box_database!(
    FileTypeBox                       0x6674_7970, // "ftyp"
    MetadataBox                       0x6d65_7461, // "meta"
    HandlerBox                        0x6864_6c72, // "hdlr"
    ItemPropertiesBox                 0x6970_7270, // "iprp"
    ItemPropertyContainerBox          0x6970_636f, // "ipco"
    ItemPropertyAssociationBox        0x6970_6d61, // "ipma"
    ItemLocationBox                   0x696c_6f63, // "iloc"
    ItemInfoBox                       0x6969_6e66, // "iinf"
    ItemInfoEntry                     0x696e_6665, // "infe"
    ItemReferenceBox                  0x6972_6566, // "iref"
    PrimaryItemBox                    0x7069_746d, // "pitm"
    ItemDataBox                       0x6964_6174, // "idat"
    MediaDataBox                      0x6d64_6174, // "mdat"
    FreeSpaceBox                      0x6672_6565, // "free"
    SkipBox                           0x736b_6970, // "skip"
    PixelAspectRatioBox               0x7061_7370, // "pasp"
    ImageSpatialExtentsProperty       0x6973_7065, // "ispe"
    PixelInformationProperty          0x7069_7869, // "pixi"
    RelativeLocationProperty          0x726c_6f63, // "rloc"
    AuxiliaryTypeProperty             0x6175_7843, // "auxC"
    CleanApertureBox                  0x636c_6170, // "clap"
    ImageRotationBox                  0x6972_6f74, // "irot"
    ImageMirrorBox                    0x696d_6972, // "imir"
    ColourInformationBox              0x636f_6c72, // "colr"
    ContentLightLevelBox              0x636c_6c69, // "clli"
    MasteringDisplayColourVolumeBox   0x6d64_6376, // "mdcv"
    AV1CodecConfigurationBox          0x6176_3143, // "av1C"
);

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fourcc: FourCC = From::from(*self);
        fourcc.fmt(f)
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fourcc: FourCC = From::from(*self);
        fmt::Display::fmt(&fourcc, f)
    }
}

/// A four-character code, stored exactly as it appears on the wire.
#[derive(Default, PartialEq, Eq, Clone, Copy, Hash)]
pub struct FourCC {
    pub value: [u8; 4],
}

impl FourCC {
    pub const AVIF: Self = Self { value: *b"avif" };
    pub const PICT: Self = Self { value: *b"pict" };
    pub const NULL: Self = Self { value: *b"null" };
    pub const NCLX: Self = Self { value: *b"nclx" };
    pub const RICC: Self = Self { value: *b"rICC" };
    pub const PROF: Self = Self { value: *b"prof" };
    pub const FDEL: Self = Self { value: *b"fdel" };
    pub const MIME: Self = Self { value: *b"mime" };
    pub const URI: Self = Self { value: *b"uri " };
    pub const AV01: Self = Self { value: *b"av01" };
    pub const AUXL: Self = Self { value: *b"auxl" };
    pub const DIMG: Self = Self { value: *b"dimg" };

    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.value)
    }
}

impl From<u32> for FourCC {
    fn from(number: u32) -> Self {
        Self { value: number.to_be_bytes() }
    }
}

impl From<BoxType> for FourCC {
    fn from(t: BoxType) -> Self {
        let box_num: u32 = Into::into(t);
        From::from(box_num)
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(value: [u8; 4]) -> Self {
        Self { value }
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(value: &[u8; 4]) -> Self {
        Self { value: *value }
    }
}

impl From<FourCC> for BoxType {
    fn from(fourcc: FourCC) -> Self {
        Self::from(fourcc.to_u32())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.value) {
            Ok(s) => f.write_str(s),
            Err(_) => self.value.fmt(f),
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.value) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "0x{:08x}", self.to_u32()),
        }
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self.value.eq(*other)
    }
}
