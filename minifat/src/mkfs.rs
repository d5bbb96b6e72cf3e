//! Formatage d'une image neuve.
//!
//! L'équivalent d'un petit `mkfs` : écrit un superbloc cohérent, une FAT
//! vide (entrée 0 verrouillée sur la fin de chaîne) et un répertoire racine
//! vide. Les images produites ici passent toutes les validations du montage.

use log::debug;

use vdisk::{BlockDevice, BLOCK_SIZE};

use crate::superblock::Superblock;
use crate::{fat_block, FsError, FAT_EOC, FAT_ENTRIES_PER_BLOCK};

/// Formate `disk` et renvoie la géométrie retenue.
///
/// La géométrie maximise la zone de données : la FAT ne grossit que du
/// strict nécessaire pour décrire chaque bloc de données. Il faut au moins
/// 4 blocs (superbloc, FAT, racine, un bloc de données) et au plus 65535,
/// la limite adressable du superbloc.
pub fn format<D: BlockDevice>(disk: &mut D) -> Result<Superblock, FsError> {
    let total = disk.count();
    if total < 4 || total > u16::MAX as usize {
        return Err(FsError::BadDisk);
    }

    let mut fat_blocks = 1usize;
    while fat_blocks * FAT_ENTRIES_PER_BLOCK < total - 2 - fat_blocks {
        fat_blocks += 1;
    }
    let data_blocks = total - 2 - fat_blocks;

    let sb = Superblock {
        total_blocks: total as u16,
        root_index: (1 + fat_blocks) as u16,
        data_index: (2 + fat_blocks) as u16,
        data_blocks: data_blocks as u16,
        fat_blocks: fat_blocks as u8,
    };

    let mut fat = vec![0u16; data_blocks];
    fat[0] = FAT_EOC;

    disk.write_block(0, &sb.serialize())?;
    for i in 0..fat_blocks {
        disk.write_block(1 + i, &fat_block(&fat, i))?;
    }
    disk.write_block(sb.root_index as usize, &[0u8; BLOCK_SIZE])?;

    debug!(
        "image formatée: {total} blocs dont {data_blocks} de données, FAT sur {fat_blocks} bloc(s)"
    );
    Ok(sb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk::MemDisk;

    #[test]
    fn format_rejects_tiny_disks() {
        let mut disk = MemDisk::new(3);
        assert_eq!(format(&mut disk), Err(FsError::BadDisk));
    }

    #[test]
    fn format_uses_every_spare_block_for_data() {
        let mut disk = MemDisk::new(64);
        let sb = format(&mut disk).unwrap();

        assert_eq!(sb.total_blocks, 64);
        assert_eq!(sb.fat_blocks, 1);
        assert_eq!(sb.root_index, 2);
        assert_eq!(sb.data_index, 3);
        assert_eq!(sb.data_blocks, 61);
        assert_eq!(sb.validate(64), Ok(()));
    }

    #[test]
    fn format_grows_the_fat_with_the_disk() {
        // 4000 blocs de données ne tiennent pas dans un seul bloc de FAT
        let mut disk = MemDisk::new(4003);
        let sb = format(&mut disk).unwrap();

        assert_eq!(sb.fat_blocks, 2);
        assert_eq!(sb.data_blocks, 3999);
        assert_eq!(sb.validate(4003), Ok(()));
    }
}
