//! Tests d'intégration sur des images complètes.
//!
//! Le but est de vérifier que la bibliothèque fonctionne sur un vrai fichier
//! image (pas seulement sur un volume mémoire), et qu'elle lit les images
//! produites par un autre outil respectant le même format.

use minifat::{format, FileSystem, FsError, FAT_EOC};
use vdisk::{ImageDisk, MemDisk, BLOCK_SIZE};

/// Volume de 8 blocs assemblé octet par octet, comme le ferait un formateur
/// externe : superbloc, FAT (1 bloc), racine, 4 blocs de données, 1 bloc
/// inutilisé. Contient un fichier `hello` de 5 octets ("world").
fn build_foreign_image() -> Vec<u8> {
    let mut disk = vec![0u8; 8 * BLOCK_SIZE];

    // superbloc
    {
        let b = &mut disk[0..BLOCK_SIZE];
        b[0..8].copy_from_slice(b"ECS150FS");
        b[8..10].copy_from_slice(&8u16.to_le_bytes()); // blocs au total
        b[10..12].copy_from_slice(&2u16.to_le_bytes()); // racine
        b[12..14].copy_from_slice(&3u16.to_le_bytes()); // début des données
        b[14..16].copy_from_slice(&4u16.to_le_bytes()); // blocs de données
        b[16] = 1; // blocs de FAT
    }

    // FAT (bloc 1) : entrée 0 réservée, entrée 1 = chaîne de `hello`
    {
        let fat = &mut disk[BLOCK_SIZE..2 * BLOCK_SIZE];
        fat[0..2].copy_from_slice(&FAT_EOC.to_le_bytes());
        fat[2..4].copy_from_slice(&FAT_EOC.to_le_bytes());
    }

    // racine (bloc 2) : une seule entrée, `hello`, 5 octets, premier bloc 1
    {
        let root = &mut disk[2 * BLOCK_SIZE..3 * BLOCK_SIZE];
        root[0..5].copy_from_slice(b"hello");
        root[16..20].copy_from_slice(&5u32.to_le_bytes());
        root[20..22].copy_from_slice(&1u16.to_le_bytes());
    }

    // bloc de données 1 -> bloc 4 du disque
    disk[4 * BLOCK_SIZE..4 * BLOCK_SIZE + 5].copy_from_slice(b"world");

    disk
}

#[test]
fn foreign_image_is_readable() {
    let disk = MemDisk::from_vec(build_foreign_image()).unwrap();
    let mut fs = FileSystem::mount(disk).unwrap();

    assert_eq!(
        fs.info(),
        "FS Info:\n\
         total_blk_count=8\n\
         fat_blk_count=1\n\
         rdir_blk=2\n\
         data_blk=3\n\
         data_blk_count=4\n\
         fat_free_ratio=2/4\n\
         rdir_free_ratio=127/128\n"
    );
    assert_eq!(fs.ls(), "FS Ls:\nfile: hello, size: 5, data_blk: 1\n");

    let fd = fs.open("hello").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"world");
    fs.close(fd).unwrap();

    fs.unmount().unwrap();
}

#[test]
fn foreign_image_round_trips_unchanged() {
    let image = build_foreign_image();
    let disk = MemDisk::from_vec(image.clone()).unwrap();

    // monter puis démonter sans rien toucher réécrit les mêmes octets
    let fs = FileSystem::mount(disk).unwrap();
    let disk = fs.unmount().unwrap();
    assert_eq!(disk.as_bytes(), &image[..]);
}

#[test]
fn file_backed_image_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.img");

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    {
        let mut disk = ImageDisk::create(&path, 32).unwrap();
        format(&mut disk).unwrap();

        let mut fs = FileSystem::mount(disk).unwrap();
        fs.create("journal").unwrap();
        let fd = fs.open("journal").unwrap();
        assert_eq!(fs.write(fd, &payload).unwrap(), payload.len());
        fs.close(fd).unwrap();
        fs.unmount().unwrap();
    }

    let disk = ImageDisk::open(&path).unwrap();
    let mut fs = FileSystem::mount(disk).unwrap();

    let fd = fs.open("journal").unwrap();
    assert_eq!(fs.stat(fd).unwrap() as usize, payload.len());

    let mut back = vec![0u8; payload.len()];
    assert_eq!(fs.read(fd, &mut back).unwrap(), payload.len());
    assert_eq!(back, payload);

    fs.close(fd).unwrap();
    fs.unmount().unwrap();
}

#[test]
fn directory_survives_many_files_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plein.img");

    {
        let mut disk = ImageDisk::create(&path, 64).unwrap();
        format(&mut disk).unwrap();

        let mut fs = FileSystem::mount(disk).unwrap();
        for i in 0..10 {
            let name = format!("fichier{i}");
            fs.create(&name).unwrap();
            let fd = fs.open(&name).unwrap();
            fs.write(fd, name.as_bytes()).unwrap();
            fs.close(fd).unwrap();
        }
        fs.delete("fichier3").unwrap();
        fs.unmount().unwrap();
    }

    let disk = ImageDisk::open(&path).unwrap();
    let mut fs = FileSystem::mount(disk).unwrap();

    let files = fs.list_files();
    assert_eq!(files.len(), 9);
    assert!(files.iter().all(|f| f.name != "fichier3"));

    // l'ordre des slots est stable à travers un remontage
    assert_eq!(files[0].name, "fichier0");

    for file in files {
        let fd = fs.open(&file.name).unwrap();
        let mut buf = vec![0u8; file.size as usize];
        fs.read(fd, &mut buf).unwrap();
        assert_eq!(buf, file.name.as_bytes());
        fs.close(fd).unwrap();
    }

    fs.unmount().unwrap();
}

#[test]
fn writes_are_visible_before_unmount() {
    // les blocs de données partent sur le disque au fil de l'eau; seules les
    // métadonnées attendent le démontage
    let mut disk = MemDisk::new(16);
    format(&mut disk).unwrap();
    let mut fs = FileSystem::mount(disk).unwrap();

    fs.create("direct").unwrap();
    let a = fs.open("direct").unwrap();
    let b = fs.open("direct").unwrap();
    fs.write(a, b"abcd").unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(fs.read(b, &mut buf).unwrap(), 4);
    assert_eq!(&buf, b"abcd");

    fs.close(a).unwrap();
    fs.close(b).unwrap();

    let err = fs.delete("absent").unwrap_err();
    assert_eq!(err, FsError::NotFound);

    fs.unmount().unwrap();
}
