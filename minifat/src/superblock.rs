//! Superbloc du volume (bloc 0).
//!
//! Le superbloc décrit la géométrie de l'image : nombre total de blocs,
//! position de la racine et de la zone de données, taille de la FAT.
//! Tout est sérialisé champ par champ en petit-boutiste; on ne calque
//! jamais une struct mémoire sur les octets du disque.

use log::warn;

use vdisk::BLOCK_SIZE;

use crate::FsError;

/// Signature attendue au début du bloc 0 (sans NUL final).
pub const SIGNATURE: &[u8; 8] = b"ECS150FS";

/// Géométrie du volume, telle que lue dans le bloc 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// Nombre total de blocs de l'image.
    pub total_blocks: u16,
    /// Indice du bloc contenant le répertoire racine.
    pub root_index: u16,
    /// Indice du premier bloc de données.
    pub data_index: u16,
    /// Nombre de blocs de données.
    pub data_blocks: u16,
    /// Nombre de blocs occupés par la FAT.
    pub fat_blocks: u8,
}

impl Superblock {
    /// Décode le bloc 0.
    ///
    /// Seule la signature est contrôlée ici; la cohérence de la géométrie
    /// est vérifiée séparément par [`Superblock::validate`].
    pub fn parse(block: &[u8; BLOCK_SIZE]) -> Result<Self, FsError> {
        if &block[0..8] != SIGNATURE {
            warn!("signature absente du bloc 0");
            return Err(FsError::BadDisk);
        }

        Ok(Self {
            total_blocks: u16::from_le_bytes([block[8], block[9]]),
            root_index: u16::from_le_bytes([block[10], block[11]]),
            data_index: u16::from_le_bytes([block[12], block[13]]),
            data_blocks: u16::from_le_bytes([block[14], block[15]]),
            fat_blocks: block[16],
        })
    }

    /// Vérifie la cohérence de la géométrie vis-à-vis du disque sous-jacent.
    ///
    /// Un volume valide place la FAT juste après le superbloc, la racine
    /// juste après la FAT, puis la zone de données; et la FAT doit pouvoir
    /// décrire chaque bloc de données (2 octets par entrée).
    pub fn validate(&self, device_blocks: usize) -> Result<(), FsError> {
        let ok = self.total_blocks as usize == device_blocks
            && self.fat_blocks > 0
            && self.data_blocks > 0
            && self.root_index as usize == self.fat_blocks as usize + 1
            && self.data_index as usize == self.root_index as usize + 1
            && self.fat_blocks as usize * BLOCK_SIZE >= self.data_blocks as usize * 2
            && self.data_index as usize + self.data_blocks as usize <= self.total_blocks as usize;

        if !ok {
            warn!("géométrie incohérente pour {device_blocks} blocs: {self:?}");
            return Err(FsError::BadDisk);
        }
        Ok(())
    }

    /// Encode le superbloc vers son bloc de 4096 octets.
    pub fn serialize(&self) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[0..8].copy_from_slice(SIGNATURE);
        block[8..10].copy_from_slice(&self.total_blocks.to_le_bytes());
        block[10..12].copy_from_slice(&self.root_index.to_le_bytes());
        block[12..14].copy_from_slice(&self.data_index.to_le_bytes());
        block[14..16].copy_from_slice(&self.data_blocks.to_le_bytes());
        block[16] = self.fat_blocks;
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        Superblock {
            total_blocks: 8,
            root_index: 2,
            data_index: 3,
            data_blocks: 5,
            fat_blocks: 1,
        }
    }

    #[test]
    fn serialize_then_parse_is_identity() {
        let sb = sample();
        let parsed = Superblock::parse(&sb.serialize()).unwrap();
        assert_eq!(parsed, sb);
    }

    #[test]
    fn parse_rejects_missing_signature() {
        let block = [0u8; BLOCK_SIZE];
        assert_eq!(Superblock::parse(&block), Err(FsError::BadDisk));
    }

    #[test]
    fn validate_accepts_coherent_geometry() {
        assert_eq!(sample().validate(8), Ok(()));
    }

    #[test]
    fn validate_rejects_wrong_device_size() {
        assert_eq!(sample().validate(9), Err(FsError::BadDisk));
    }

    #[test]
    fn validate_rejects_misplaced_root() {
        let mut sb = sample();
        sb.root_index = 3;
        sb.data_index = 4;
        assert_eq!(sb.validate(8), Err(FsError::BadDisk));
    }

    #[test]
    fn validate_rejects_undersized_fat() {
        // 1 bloc de FAT décrit au plus 2048 entrées
        let sb = Superblock {
            total_blocks: 4000,
            root_index: 2,
            data_index: 3,
            data_blocks: 2500,
            fat_blocks: 1,
        };
        assert_eq!(sb.validate(4000), Err(FsError::BadDisk));
    }

    #[test]
    fn validate_rejects_data_region_past_disk_end() {
        let mut sb = sample();
        sb.data_blocks = 6;
        assert_eq!(sb.validate(8), Err(FsError::BadDisk));
    }
}
