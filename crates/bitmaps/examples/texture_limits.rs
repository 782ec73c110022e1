use bitmaps::{TextureExtent, TileGrid};

fn main() {
    let mut args = std::env::args().skip(1);
    let width = args.next().and_then(|arg| arg.parse().ok()).unwrap_or(4096u32);
    let height = args.next().and_then(|arg| arg.parse().ok()).unwrap_or(width);

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapters: Vec<wgpu::Adapter> =
        pollster::block_on(instance.enumerate_adapters(wgpu::Backends::all()));
    if adapters.is_empty() {
        println!("No wgpu adapters found");
        return;
    }

    for (index, adapter) in adapters.iter().enumerate() {
        let info = adapter.get_info();
        let max = adapter.limits().max_texture_dimension_2d;
        let grid = TileGrid::new(width, height, TextureExtent::new(max, max));

        println!("Adapter #{index}:");
        println!("  name: {}", info.name);
        println!("  backend: {:?}", info.backend);
        println!("  max_texture_dimension_2d: {max}");
        println!(
            "  {width}x{height} bitmap: {}x{} grid, {} texture(s)",
            grid.columns(),
            grid.rows(),
            grid.tile_count()
        );
        for rect in grid.iter_rects() {
            println!(
                "    ({}, {}) {}x{}",
                rect.x, rect.y, rect.width, rect.height
            );
        }
    }
}
