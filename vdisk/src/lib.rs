//! Disque virtuel à blocs de 4096 octets.
//!
//! Ce crate fournit le contrat consommé par le cœur du système de fichiers :
//! - toutes les E/S sont alignées et dimensionnées sur un bloc entier,
//! - `ImageDisk` travaille sur un fichier image de l'hôte,
//! - `MemDisk` garde le volume dans un buffer mémoire (pratique en test).
//!
//! Ouvrir un disque, c'est construire la valeur; le fermer, c'est la lâcher.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

/// Taille fixe d'un bloc du disque virtuel, en octets.
pub const BLOCK_SIZE: usize = 4096;

/// Erreurs possibles au niveau du disque virtuel.
#[derive(Debug, Error)]
pub enum DiskError {
    /// L'indice de bloc demandé dépasse la taille du disque.
    #[error("bloc {0} hors du disque")]
    OutOfRange(usize),
    /// La taille de l'image n'est pas un multiple de la taille d'un bloc.
    #[error("image invalide: taille non multiple de {BLOCK_SIZE} octets")]
    BadImage,
    /// Erreur d'entrée/sortie sur le fichier hôte.
    #[error("E/S sur le fichier image: {0}")]
    Io(#[from] std::io::Error),
}

/// Contrat d'accès au disque virtuel.
///
/// Le cœur du système de fichiers ne contourne jamais cette interface :
/// chaque lecture ou écriture porte sur un bloc complet.
pub trait BlockDevice {
    /// Nombre de blocs du disque.
    fn count(&self) -> usize;

    /// Lit le bloc `index` dans `buf`.
    fn read_block(&mut self, index: usize, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), DiskError>;

    /// Écrit `buf` dans le bloc `index`.
    fn write_block(&mut self, index: usize, buf: &[u8; BLOCK_SIZE]) -> Result<(), DiskError>;
}

/// Disque virtuel stocké dans un fichier image de l'hôte.
///
/// Le fichier est possédé entre l'ouverture et le drop de la valeur.
#[derive(Debug)]
pub struct ImageDisk {
    file: std::fs::File,
    blocks: usize,
}

impl ImageDisk {
    /// Ouvre une image existante en lecture/écriture.
    ///
    /// La taille du fichier doit être un multiple de 4096 octets.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DiskError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len % BLOCK_SIZE != 0 {
            return Err(DiskError::BadImage);
        }

        let blocks = len / BLOCK_SIZE;
        log::debug!("image ouverte: {blocks} blocs");
        Ok(Self { file, blocks })
    }

    /// Crée une image neuve de `blocks` blocs remplis de zéros.
    ///
    /// Un fichier existant au même chemin est écrasé.
    pub fn create<P: AsRef<Path>>(path: P, blocks: usize) -> Result<Self, DiskError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((blocks * BLOCK_SIZE) as u64)?;

        log::debug!("image créée: {blocks} blocs");
        Ok(Self { file, blocks })
    }

    fn seek_to(&mut self, index: usize) -> Result<(), DiskError> {
        if index >= self.blocks {
            return Err(DiskError::OutOfRange(index));
        }
        self.file.seek(SeekFrom::Start((index * BLOCK_SIZE) as u64))?;
        Ok(())
    }
}

impl BlockDevice for ImageDisk {
    fn count(&self) -> usize {
        self.blocks
    }

    fn read_block(&mut self, index: usize, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), DiskError> {
        self.seek_to(index)?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&mut self, index: usize, buf: &[u8; BLOCK_SIZE]) -> Result<(), DiskError> {
        self.seek_to(index)?;
        self.file.write_all(buf)?;
        Ok(())
    }
}

/// Disque virtuel gardé en mémoire.
///
/// Le volume entier vit dans un `Vec<u8>` et reste inspectable après coup,
/// ce qui en fait le double de test naturel.
#[derive(Debug, Clone)]
pub struct MemDisk {
    data: Vec<u8>,
}

impl MemDisk {
    /// Crée un disque de `blocks` blocs remplis de zéros.
    pub fn new(blocks: usize) -> Self {
        Self { data: vec![0; blocks * BLOCK_SIZE] }
    }

    /// Reprend un volume existant.
    ///
    /// La taille doit être un multiple de 4096 octets.
    pub fn from_vec(data: Vec<u8>) -> Result<Self, DiskError> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(DiskError::BadImage);
        }
        Ok(Self { data })
    }

    /// Accès direct aux octets du volume.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Rend le volume complet.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, index: usize) -> Result<std::ops::Range<usize>, DiskError> {
        if index >= self.count() {
            return Err(DiskError::OutOfRange(index));
        }
        let start = index * BLOCK_SIZE;
        Ok(start..start + BLOCK_SIZE)
    }
}

impl BlockDevice for MemDisk {
    fn count(&self) -> usize {
        self.data.len() / BLOCK_SIZE
    }

    fn read_block(&mut self, index: usize, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), DiskError> {
        let range = self.range(index)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_block(&mut self, index: usize, buf: &[u8; BLOCK_SIZE]) -> Result<(), DiskError> {
        let range = self.range(index)?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}
